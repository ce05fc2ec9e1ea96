// Market data domain
pub mod market;

// Trading domain
pub mod trading;

// Decision & reflection value objects
pub mod decision;
pub mod playbook;

// Cross-service protocol
pub mod messages;

// Seams
pub mod errors;
pub mod ports;
pub mod repositories;
