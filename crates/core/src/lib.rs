pub mod connection;
pub mod environments;
pub mod executor;
pub mod logging;
pub mod results;
pub mod schema;
pub mod tunnel;
