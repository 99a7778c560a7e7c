pub mod analysis;
pub mod catalog;
pub mod dictation;
pub mod editor;
pub mod export;
pub mod imaging;
pub mod llm;
pub mod panels;
pub mod script;
pub mod setup;
pub mod workflow;
