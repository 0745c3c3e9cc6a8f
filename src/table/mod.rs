pub mod block;
pub mod block_builder;
pub mod filter_block;
pub mod format;
pub mod iterator;
pub mod table;
pub mod table_builder;
pub mod table_properties;
pub mod table_reader;
pub mod two_level_iterator;
