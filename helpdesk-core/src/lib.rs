//! Domain core for the help-request escalation service.
//!
//! Everything here is pure: request types, keyword classification and
//! supervisor routing. Persistence, notification and HTTP live in
//! `helpdesk-server`.

pub mod classifier;
pub mod request;
pub mod routing;

pub use classifier::{classify, determine_priority, extract_tags, has_urgent_signal, Classification};
pub use request::{
    HelpRequest, Metadata, Priority, RequestId, RequestStatus, SupervisorId, UnknownVariant,
};
pub use routing::{
    AssignmentResolver, Availability, RouteCondition, RouteRule, RoutingConfig,
    RoutingConfigError, Supervisor,
};
