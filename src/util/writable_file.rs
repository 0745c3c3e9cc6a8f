use crate::obj::status::Status;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
#[cfg(unix)]
use {crate::util::K_OPEN_BASE_FLAGS, std::os::unix::fs::OpenOptionsExt};

pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<(), Status>;
    fn flush(&mut self) -> Result<(), Status>;
    fn sync(&mut self) -> Result<(), Status>;
}

const K_WRITABLE_FILE_BUFFER_SIZE: usize = 65536;

pub(crate) struct StdWritableFile {
    write_buf: BufWriter<File>,
    filename: String,
}

impl StdWritableFile {
    /// truncate 为 true 时清空已有内容，否则追加
    pub(crate) fn new(filename: &Path, truncate: bool) -> std::io::Result<Self> {
        let mut option = OpenOptions::new();
        option.write(true).create(true);
        if truncate {
            option.truncate(true);
        } else {
            option.append(true);
        }
        #[cfg(unix)]
        {
            option.mode(0o644);
            option.custom_flags(K_OPEN_BASE_FLAGS);
        }
        let file = option.open(filename)?;
        Ok(StdWritableFile {
            write_buf: BufWriter::with_capacity(K_WRITABLE_FILE_BUFFER_SIZE, file),
            filename: filename.to_string_lossy().into_owned(),
        })
    }
}

impl WritableFile for StdWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<(), Status> {
        self.write_buf
            .write_all(data)
            .map_err(|e| Status::from_io_error(e, &self.filename))
    }

    fn flush(&mut self) -> Result<(), Status> {
        self.write_buf
            .flush()
            .map_err(|e| Status::from_io_error(e, &self.filename))
    }

    fn sync(&mut self) -> Result<(), Status> {
        self.flush()?;
        self.write_buf
            .get_ref()
            .sync_data()
            .map_err(|e| Status::from_io_error(e, &self.filename))
    }
}
