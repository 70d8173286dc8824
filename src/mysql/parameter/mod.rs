mod mysql_server;
mod pmm;
pub mod tmpl;

pub use mysql_server::{derive_server_id, MySQLServer};
pub use pmm::PmmClient;
