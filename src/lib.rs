pub mod db;
pub mod obj;
pub mod table;
pub mod util;
