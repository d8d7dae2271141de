/// Broadcast frame construction and channel fan-out.
pub mod broadcast_events;
/// Expired-key consumer driving auto-close.
pub mod expiry_listener;
/// Health check service.
pub mod health_service;
/// Poll and Q&A application logic.
pub mod interaction_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;
