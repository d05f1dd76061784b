pub mod backend;
pub mod ddl;
