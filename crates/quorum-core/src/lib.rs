pub mod agent_message;
pub mod clock;
pub mod config;
pub mod notification;
pub mod session;
pub mod signal;
pub mod timeline;
pub mod trading_day;

pub use agent_message::{
    AnalysisReport, AnalysisRequest, AnalystRole, ConversationTurn, ToolOutput, TurnReply,
};
pub use clock::{Clock, ClockError, ClockKind, SystemClock, VirtualClock, VirtualClockState};
pub use config::{
    AgentsConfig, AnalystConfig, CommunicationConfig, ConfigError, DecisionMode, ExecutionMode,
    MarketConfig, NotificationConfig, PortfolioConfig, QuorumConfig, RunConfig, RunMode,
    StoreConfig,
};
pub use notification::{Category, Notification, NotificationDraft, Urgency};
pub use session::{
    CommunicationSession, SessionKind, SessionMessage, SessionRequest, SessionTermination,
};
pub use signal::{
    FailureKind, PartialFailure, Round, Signal, SignalKey, SignalOutput, SignalRecord,
    VerdictSource,
};
pub use timeline::{EventRecorder, EventReplayer, EventType, ReplayOptions, TimelineEvent};
pub use trading_day::{
    DayPhase, MarketStatus, PortfolioSnapshot, Position, RiskAssessment, RiskLevel,
    TickerDecision, Trade, TradeAction, TradingDayState,
};
