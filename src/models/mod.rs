pub mod caption;
pub mod settings;
pub mod usage;

pub use caption::{CaptionNodeState, MutationRecord, NodeId, NodeStateTable, TextNodeSnapshot};
pub use settings::TranslatorSettings;
pub use usage::{UsageState, FREE_TRANSLATION_LIMIT};
