use crate::obj::slice::Slice;
use crate::obj::status::Status;
use crate::util::arena::ArenaBox;

/// 有序 kv 序列上的游标。key()/value() 只在 valid() 时可以调用。
pub trait Iter {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    /// 定位到第一个 >= target 的位置
    fn seek(&mut self, target: &Slice);
    fn next(&mut self);
    fn prev(&mut self);
    fn key(&self) -> Slice;
    fn value(&self) -> Slice;
    fn status(&self) -> Status;
}

impl<I: Iter + ?Sized> Iter for Box<I> {
    fn valid(&self) -> bool {
        (**self).valid()
    }
    fn seek_to_first(&mut self) {
        (**self).seek_to_first()
    }
    fn seek_to_last(&mut self) {
        (**self).seek_to_last()
    }
    fn seek(&mut self, target: &Slice) {
        (**self).seek(target)
    }
    fn next(&mut self) {
        (**self).next()
    }
    fn prev(&mut self) {
        (**self).prev()
    }
    fn key(&self) -> Slice {
        (**self).key()
    }
    fn value(&self) -> Slice {
        (**self).value()
    }
    fn status(&self) -> Status {
        (**self).status()
    }
}

/// 永远无效的迭代器，可以带一个错误
pub struct EmptyIterator {
    status: Status,
}

impl Iter for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn seek(&mut self, _target: &Slice) {}

    fn next(&mut self) {}

    fn prev(&mut self) {}

    fn key(&self) -> Slice {
        Slice::new_empty()
    }

    fn value(&self) -> Slice {
        Slice::new_empty()
    }

    fn status(&self) -> Status {
        self.status.clone()
    }
}

pub fn new_empty_iterator() -> EmptyIterator {
    EmptyIterator {
        status: Status::ok(),
    }
}

pub fn new_error_iterator(status: Status) -> EmptyIterator {
    EmptyIterator { status }
}

pub type Cleanup<'a> = Box<dyn FnOnce() + 'a>;

/// 给内部迭代器挂上清理任务，迭代器析构时按注册顺序执行。
/// 无论迭代器是读完、提前丢弃还是出错后丢弃，清理都只执行一次。
pub struct IterWithCleanup<'a> {
    inner: Box<dyn Iter + 'a>,
    cleanups: Vec<Cleanup<'a>>,
}

impl<'a> IterWithCleanup<'a> {
    pub fn new(inner: Box<dyn Iter + 'a>) -> IterWithCleanup<'a> {
        IterWithCleanup {
            inner,
            cleanups: Vec::new(),
        }
    }

    pub fn register_cleanup(&mut self, cleanup: impl FnOnce() + 'a) {
        self.cleanups.push(Box::new(cleanup));
    }
}

impl Drop for IterWithCleanup<'_> {
    fn drop(&mut self) {
        // 先析构内部迭代器，清理任务释放的资源可能正被它引用
        drop(std::mem::replace(
            &mut self.inner,
            Box::new(new_empty_iterator()),
        ));
        for cleanup in self.cleanups.drain(..) {
            cleanup();
        }
    }
}

impl Iter for IterWithCleanup<'_> {
    fn valid(&self) -> bool {
        self.inner.valid()
    }
    fn seek_to_first(&mut self) {
        self.inner.seek_to_first()
    }
    fn seek_to_last(&mut self) {
        self.inner.seek_to_last()
    }
    fn seek(&mut self, target: &Slice) {
        self.inner.seek(target)
    }
    fn next(&mut self) {
        self.inner.next()
    }
    fn prev(&mut self) {
        self.inner.prev()
    }
    fn key(&self) -> Slice {
        self.inner.key()
    }
    fn value(&self) -> Slice {
        self.inner.value()
    }
    fn status(&self) -> Status {
        self.inner.status()
    }
}

/// 把 arena 中的具体迭代器转成 trait object
pub fn into_arena_iter<'a, I: Iter + 'a>(iter: ArenaBox<'a, I>) -> ArenaBox<'a, dyn Iter + 'a> {
    let raw: *mut I = ArenaBox::into_raw(iter);
    // 指针来自同一个 arena 分配的 box，只是换成了胖指针
    let raw: *mut (dyn Iter + 'a) = raw;
    unsafe { ArenaBox::from_raw(raw) }
}
