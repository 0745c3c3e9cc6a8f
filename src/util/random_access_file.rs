use crate::obj::slice::Slice;
use crate::obj::status::Status;
use bytes::{Bytes, BytesMut};
use memmap2::Mmap;
use positioned_io::ReadAt;
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
#[cfg(unix)]
use {crate::util::K_OPEN_BASE_FLAGS, std::os::unix::fs::OpenOptionsExt};

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// 给操作系统的访问模式提示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPattern {
    Normal,
    Random,
    Sequential,
    WillNeed,
}

/// 可并发随机读的文件。读操作只需要 &self，多个 reader 可共享同一个实例。
pub trait RandomAccessFile: Send + Sync + Debug {
    /// 从 offset 读最多 n 个字节；到文件尾时返回的数据可能不足 n
    fn read(&self, offset: u64, n: usize) -> Result<Slice, Status>;
    fn size(&self) -> Result<u64, Status>;
    fn hint(&self, _pattern: AccessPattern) {}
}

#[derive(Debug, Default)]
pub struct Limiter {
    #[cfg(debug_assertions)]
    max_acquires: i64,
    acquires_allowed: AtomicI64,
}

impl Limiter {
    /// Limit maximum number of resources to `max_acquires`.
    pub fn new(max_acquires: i64) -> Self {
        debug_assert!(max_acquires >= 0);
        Limiter {
            #[cfg(debug_assertions)]
            max_acquires,
            acquires_allowed: AtomicI64::new(max_acquires),
        }
    }

    // If another resource is available, acquire it and return true.
    // Else return false.
    pub fn acquire(&self) -> bool {
        let old_acquires_allowed = self.acquires_allowed.fetch_sub(1, Ordering::Relaxed);

        if old_acquires_allowed > 0 {
            return true;
        }

        let pre_increment_acquires_allowed = self.acquires_allowed.fetch_add(1, Ordering::Relaxed);

        let _ = pre_increment_acquires_allowed;
        // If the check below fails, Release() was called more times than acquire.
        #[cfg(debug_assertions)]
        debug_assert!(pre_increment_acquires_allowed < self.max_acquires);

        false
    }

    /// Release a resource acquired by a previous call to Acquire() that returned
    /// true.
    pub fn release(&self) {
        let old_acquires_allowed = self.acquires_allowed.fetch_add(1, Ordering::Relaxed);

        let _ = old_acquires_allowed;
        // If the check below fails, Release() was called more times than acquire.
        #[cfg(debug_assertions)]
        debug_assert!(old_acquires_allowed < self.max_acquires);
    }
}

fn open_read_only(filename: &Path) -> io::Result<File> {
    let mut option = OpenOptions::new();
    option.read(true);
    #[cfg(unix)]
    {
        option.custom_flags(K_OPEN_BASE_FLAGS); // 对应 O_CLOEXEC
    }
    option.open(filename)
}

#[cfg(target_os = "linux")]
fn fadvise(file: &File, pattern: AccessPattern) {
    use std::os::unix::io::AsRawFd;
    let advice = match pattern {
        AccessPattern::Normal => libc::POSIX_FADV_NORMAL,
        AccessPattern::Random => libc::POSIX_FADV_RANDOM,
        AccessPattern::Sequential => libc::POSIX_FADV_SEQUENTIAL,
        AccessPattern::WillNeed => libc::POSIX_FADV_WILLNEED,
    };
    // 只是提示，失败不影响正确性
    unsafe {
        libc::posix_fadvise(file.as_raw_fd(), 0, 0, advice);
    }
}

#[cfg(not(target_os = "linux"))]
fn fadvise(_file: &File, _pattern: AccessPattern) {}

// pread 直到读满 buf 或遇到文件尾
fn read_full(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match file.read_at(offset + read as u64, &mut buf[read..]) {
            Ok(0) => break,
            Ok(len) => read += len,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

/// 基于 pread 的实现。fd 数量受 limiter 约束：拿不到名额时每次读都临时打开文件。
#[derive(Debug)]
pub(crate) struct StdRandomAccessFile {
    limiter: Arc<Limiter>,
    file: Option<File>,
    filename: String, // 用于错误报告
}

impl Drop for StdRandomAccessFile {
    fn drop(&mut self) {
        if self.file.is_some() {
            self.limiter.release();
        }
    }
}

impl StdRandomAccessFile {
    pub(crate) fn new(filename: &Path, limiter: Arc<Limiter>) -> io::Result<StdRandomAccessFile> {
        let file = open_read_only(filename)?;
        let file = if limiter.acquire() {
            Some(file)
        } else {
            None
        };
        Ok(StdRandomAccessFile {
            limiter,
            file,
            filename: filename.to_string_lossy().into_owned(),
        })
    }

    fn with_file<T>(&self, f: impl FnOnce(&File) -> io::Result<T>) -> Result<T, Status> {
        let res = match &self.file {
            Some(file) => f(file),
            None => open_read_only(Path::new(&self.filename)).and_then(|file| f(&file)),
        };
        res.map_err(|err| Status::from_io_error(err, &self.filename))
    }
}

impl RandomAccessFile for StdRandomAccessFile {
    fn read(&self, offset: u64, n: usize) -> Result<Slice, Status> {
        let mut buffer = BytesMut::zeroed(n);
        let len = self.with_file(|file| read_full(file, offset, &mut buffer[..]))?;
        buffer.truncate(len);
        Ok(Slice::new_bytes_mut(buffer))
    }

    fn size(&self) -> Result<u64, Status> {
        self.with_file(|file| file.metadata().map(|m| m.len()))
    }

    fn hint(&self, pattern: AccessPattern) {
        if let Some(file) = &self.file {
            fadvise(file, pattern);
        }
    }
}

/// mmap 实现，读操作零拷贝地切出共享的 `Bytes`
#[derive(Debug)]
pub(crate) struct PosixMmapReadableFile {
    limiter: Arc<Limiter>,
    region: Bytes,
    filename: String,
    file: File,
}

impl Drop for PosixMmapReadableFile {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

impl PosixMmapReadableFile {
    /// 调用方已经从 limiter 取得名额；打开失败时由本函数归还
    pub(crate) fn new(filename: &Path, limiter: Arc<Limiter>) -> io::Result<PosixMmapReadableFile> {
        let mapped = open_read_only(filename).and_then(|file| {
            let mmap = unsafe { Mmap::map(&file)? };
            Ok((file, mmap))
        });
        match mapped {
            Ok((file, mmap)) => Ok(PosixMmapReadableFile {
                limiter,
                region: Bytes::from_owner(mmap),
                filename: filename.to_string_lossy().into_owned(),
                file,
            }),
            Err(e) => {
                limiter.release();
                Err(e)
            }
        }
    }
}

impl RandomAccessFile for PosixMmapReadableFile {
    fn read(&self, offset: u64, n: usize) -> Result<Slice, Status> {
        let len = self.region.len() as u64;
        if offset > len {
            return Err(Status::io_error(
                &self.filename,
                Some("offset out of range"),
            ));
        }
        let end = std::cmp::min(offset + n as u64, len);
        Ok(Slice::new(
            self.region.slice(offset as usize..end as usize),
        ))
    }

    fn size(&self) -> Result<u64, Status> {
        Ok(self.region.len() as u64)
    }

    fn hint(&self, pattern: AccessPattern) {
        fadvise(&self.file, pattern);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("raf-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn test_limiter() {
        let limiter = Limiter::new(2);
        assert!(limiter.acquire());
        assert!(limiter.acquire());
        assert!(!limiter.acquire());
        limiter.release();
        assert!(limiter.acquire());
    }

    #[test]
    fn test_pread_file_without_permanent_fd() {
        let path = write_test_file("pread.txt", b"0123456789");
        let limiter = Arc::new(Limiter::new(0));
        let file = StdRandomAccessFile::new(&path, limiter).unwrap();
        assert!(file.file.is_none());
        assert_eq!(b"345", file.read(3, 3).unwrap().data());
        assert_eq!(b"89", file.read(8, 10).unwrap().data());
        assert_eq!(10, file.size().unwrap());
    }

    #[test]
    fn test_mmap_file() {
        let path = write_test_file("mmap.txt", b"hello mmap");
        let limiter = Arc::new(Limiter::new(1));
        assert!(limiter.acquire());
        let file = PosixMmapReadableFile::new(&path, limiter.clone()).unwrap();
        assert_eq!(b"mmap", file.read(6, 4).unwrap().data());
        assert_eq!(10, file.size().unwrap());
        assert!(file.read(11, 1).is_err());
        drop(file);
        assert!(limiter.acquire());
    }

    #[test]
    fn test_open_missing_file() {
        let limiter = Arc::new(Limiter::new(1));
        let missing = std::env::temp_dir().join("raf-test-definitely-missing");
        assert!(StdRandomAccessFile::new(&missing, limiter.clone()).is_err());
        // 打开失败不会占用名额
        assert!(limiter.acquire());
    }
}
