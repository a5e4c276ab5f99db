pub mod box_handlers;
pub mod health_handlers;
pub mod item_handlers;
