pub mod draft;
pub mod orchestrator;
pub mod reconciler;
