pub mod cdp_dom;
pub mod page_dom;
pub mod storage;

pub use cdp_dom::CdpDom;
pub use page_dom::PageDom;
pub use storage::{load_settings, TomlUsageStore, UsageStore};
