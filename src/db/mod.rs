pub mod dbformat;
pub mod file_name;
pub mod table_cache;
pub mod version_edit;
