pub mod disk_name;
pub mod serve;
pub mod version;
