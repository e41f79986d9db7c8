pub mod collaborators;
pub mod events;
pub mod groups;
pub mod model;

pub use collaborators::{Clock, CodeGen, SystemClock, SystemCodeGen, SystemUuidGen, UuidGen};
pub use events::{AgentEvent, ClientEvent, ControlMessage, EventError};
pub use groups::{agent_group_name, client_group_name};
pub use model::{
    Agent, AgentId, AgentKey, AgentRegistration, ClientAgent, ClientService, RegId,
    RegistrationState, RegistrationStatus, Service, ServiceStatus, UserId,
};
