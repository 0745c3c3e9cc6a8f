use crate::obj::options::EnvOptions;
use crate::obj::status::Status;
use crate::util::random_access_file::{
    Limiter, PosixMmapReadableFile, RandomAccessFile, StdRandomAccessFile,
};
use crate::util::writable_file::{StdWritableFile, WritableFile};
use libc::{gettimeofday, timeval};
use std::fs::{self, DirBuilder};
#[cfg(unix)]
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use std::{env, thread};
use tracing::error;

#[cfg(target_pointer_width = "64")]
pub const DEFAULT_MMAP_LIMIT: i64 = 1000;

#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_MMAP_LIMIT: i64 = 0;

#[cfg(not(unix))]
fn compute_max_open_files() -> i64 {
    // 非 unix 平台的文件句柄由系统管理，视为无限制
    i64::MAX
}

#[cfg(unix)]
fn compute_max_open_files() -> i64 {
    unsafe {
        // 获取当前进程可打开文件描述符的数量限制
        let mut rlim: libc::rlimit = std::mem::zeroed();
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) != 0 {
            // 获取失败，使用默认值 50。
            return 50;
        }
        if rlim.rlim_cur == libc::RLIM_INFINITY {
            return i64::MAX;
        }
        // 否则，允许使用 20% 的文件描述符数作为只读文件的上限。
        (rlim.rlim_cur / 5) as i64
    }
}

// 使用 OnceLock 来缓存计算结果，避免多次调用系统函数
fn max_open_files() -> i64 {
    static MAX_OPEN_FILES: OnceLock<i64> = OnceLock::new();
    *MAX_OPEN_FILES.get_or_init(compute_max_open_files)
}

#[cfg(unix)]
fn default_test_path() -> String {
    let uid = unsafe { libc::geteuid() };
    format!("/tmp/leveldbtest-{}", uid)
}

#[cfg(not(unix))]
fn default_test_path() -> String {
    env::temp_dir()
        .join("leveldbtest")
        .to_string_lossy()
        .into_owned()
}

/// 存储环境：table cache 通过它打开文件
pub trait Env: Send + Sync {
    fn new_random_access_file(
        &self,
        filename: &Path,
        env_options: &EnvOptions,
    ) -> Result<Box<dyn RandomAccessFile>, Status>;

    fn new_writable_file(&self, filename: &Path) -> Result<Box<dyn WritableFile>, Status>;

    fn file_exists(&self, filename: &Path) -> bool;

    fn get_file_size(&self, filename: &Path) -> Result<u64, Status>;

    fn remove_file(&self, filename: &Path) -> Result<(), Status>;

    fn create_dir(&self, dir: &Path) -> Result<(), Status>;

    fn get_test_directory(&self) -> Result<String, Status>;

    fn now_micros(&self) -> u64;

    fn sleep_for_microseconds(&self, micros: u64) {
        thread::sleep(Duration::from_micros(micros));
    }
}

pub struct StdEnv {
    mmap_limiter_: Arc<Limiter>,
    fd_limiter_: Arc<Limiter>,
}

impl StdEnv {
    pub fn new() -> Self {
        StdEnv {
            mmap_limiter_: Arc::new(Limiter::new(DEFAULT_MMAP_LIMIT)),
            fd_limiter_: Arc::new(Limiter::new(max_open_files())),
        }
    }
}

impl Default for StdEnv {
    fn default() -> Self {
        StdEnv::new()
    }
}

pub fn default_env() -> Arc<dyn Env> {
    static DEFAULT_ENV: OnceLock<Arc<dyn Env>> = OnceLock::new();
    DEFAULT_ENV
        .get_or_init(|| Arc::new(StdEnv::new()))
        .clone()
}

impl Env for StdEnv {
    fn new_random_access_file(
        &self,
        filename: &Path,
        env_options: &EnvOptions,
    ) -> Result<Box<dyn RandomAccessFile>, Status> {
        let filename_str = filename.to_string_lossy();
        if env_options.use_mmap_reads && self.mmap_limiter_.acquire() {
            match PosixMmapReadableFile::new(filename, self.mmap_limiter_.clone()) {
                Ok(file) => Ok(Box::new(file)),
                Err(err) => Err(Status::from_io_error(err, &filename_str)),
            }
        } else {
            match StdRandomAccessFile::new(filename, self.fd_limiter_.clone()) {
                Ok(file) => Ok(Box::new(file)),
                Err(err) => Err(Status::from_io_error(err, &filename_str)),
            }
        }
    }

    fn new_writable_file(&self, filename: &Path) -> Result<Box<dyn WritableFile>, Status> {
        match StdWritableFile::new(filename, true) {
            Ok(writable_file) => Ok(Box::new(writable_file)),
            Err(err) => Err(Status::from_io_error(err, &filename.to_string_lossy())),
        }
    }

    fn file_exists(&self, filename: &Path) -> bool {
        filename.exists()
    }

    fn get_file_size(&self, filename: &Path) -> Result<u64, Status> {
        match fs::metadata(filename) {
            Ok(meta) => Ok(meta.len()),
            Err(e) => Err(Status::from_io_error(e, &filename.to_string_lossy())),
        }
    }

    fn remove_file(&self, filename: &Path) -> Result<(), Status> {
        fs::remove_file(filename).map_err(|err| {
            error!("remove file {} error: {}", filename.display(), err);
            Status::from_io_error(err, &filename.to_string_lossy())
        })
    }

    fn create_dir(&self, dir: &Path) -> Result<(), Status> {
        // 如果文件夹已存在，直接返回成功
        if dir.exists() {
            return Ok(());
        }
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            builder.mode(0o755);
        }
        builder
            .create(dir)
            .map_err(|err| Status::from_io_error(err, &dir.to_string_lossy()))
    }

    fn get_test_directory(&self) -> Result<String, Status> {
        let dir = match env::var("TEST_TMPDIR") {
            Ok(env_val) if !env_val.is_empty() => env_val,
            _ => default_test_path(),
        };
        self.create_dir(Path::new(&dir))?;
        Ok(dir)
    }

    fn now_micros(&self) -> u64 {
        let mut tv = timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        unsafe {
            gettimeofday(&mut tv, std::ptr::null_mut());
        }
        (tv.tv_sec as u64) * 1_000_000 + (tv.tv_usec as u64)
    }
}
