pub mod agent_ws;
pub mod agents;
pub mod client_sse;
pub mod health;
pub mod registration;
