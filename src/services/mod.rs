pub mod classifier;
pub mod translation;
pub mod usage_gate;

pub use classifier::CaptionClassifier;
pub use translation::{OpenAiTranslator, Translator};
pub use usage_gate::UsageGate;
