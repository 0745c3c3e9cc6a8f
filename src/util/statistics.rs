use std::sync::atomic::{AtomicU64, Ordering};

/// 计数器种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Tickers {
    /// table cache 未命中后打开文件的次数（含失败）
    NoFileOpens = 0,
    /// 表 reader 被析构、文件关闭的次数
    NoFileCloses,
    NoFileErrors,
    TableCacheHit,
    TableCacheMiss,
}

const TICKER_ENUM_MAX: usize = Tickers::TableCacheMiss as usize + 1;

/// 线程安全的统计信息，多个组件共享一份 `Arc<Statistics>`
#[derive(Debug, Default)]
pub struct Statistics {
    tickers: [AtomicU64; TICKER_ENUM_MAX],
    table_open_count: AtomicU64,
    table_open_micros: AtomicU64,
}

impl Statistics {
    pub fn new() -> Statistics {
        Statistics::default()
    }

    pub fn record_tick(&self, ticker: Tickers, count: u64) {
        self.tickers[ticker as usize].fetch_add(count, Ordering::Relaxed);
    }

    pub fn get_ticker_count(&self, ticker: Tickers) -> u64 {
        self.tickers[ticker as usize].load(Ordering::Relaxed)
    }

    /// 记录一次打开并解析表文件的耗时
    pub fn record_table_open(&self, micros: u64) {
        self.table_open_count.fetch_add(1, Ordering::Relaxed);
        self.table_open_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// (次数, 总耗时微秒)
    pub fn table_open_io_micros(&self) -> (u64, u64) {
        (
            self.table_open_count.load(Ordering::Relaxed),
            self.table_open_micros.load(Ordering::Relaxed),
        )
    }
}

#[inline]
pub fn record_tick(statistics: Option<&Statistics>, ticker: Tickers) {
    if let Some(statistics) = statistics {
        statistics.record_tick(ticker, 1);
    }
}
