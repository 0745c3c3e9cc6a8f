use crate::table::table_reader::TableReader;
use std::fmt;
use std::sync::Arc;

/// 一个表文件的标识：文件号、所在目录和精确的文件大小
#[derive(Clone, Default)]
pub struct FileDescriptor {
    pub number: u64,
    /// `Options::db_paths` 中的下标
    pub path_id: u32,
    pub file_size: u64,
    /// 调用方已经持有的 reader，存在时不经过 table cache
    pub table_reader: Option<Arc<dyn TableReader>>,
}

impl FileDescriptor {
    pub fn new(number: u64, path_id: u32, file_size: u64) -> FileDescriptor {
        FileDescriptor {
            number,
            path_id,
            file_size,
            table_reader: None,
        }
    }

    pub fn get_number(&self) -> u64 {
        self.number
    }

    pub fn get_path_id(&self) -> u32 {
        self.path_id
    }

    pub fn get_file_size(&self) -> u64 {
        self.file_size
    }
}

impl fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDescriptor")
            .field("number", &self.number)
            .field("path_id", &self.path_id)
            .field("file_size", &self.file_size)
            .field("has_table_reader", &self.table_reader.is_some())
            .finish()
    }
}
