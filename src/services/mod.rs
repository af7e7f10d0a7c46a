pub mod ai_service;
pub mod background;
pub mod booking_service;
pub mod booking_token_service;
pub mod calendar_service;
pub mod collaboration_service;
pub mod mirror_service;
pub mod notification_service;
pub mod pipeline_service;
pub mod slot_service;
pub mod sync_queue;
