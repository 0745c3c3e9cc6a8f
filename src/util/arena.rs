use bumpalo::Bump;

pub use bumpalo::boxed::Box as ArenaBox;

/// 一次性分配区域。分配出的对象与 Arena 同生命周期，只有放进 `ArenaBox` 的对象会在 box 丢弃时析构。
#[derive(Default)]
pub struct Arena {
    bump: Bump,
}

impl Arena {
    pub fn new() -> Self {
        Self { bump: Bump::new() }
    }

    pub fn alloc<T>(&self, value: T) -> &mut T {
        self.bump.alloc(value)
    }

    /// 分配一个会在丢弃时执行析构的对象
    pub fn alloc_boxed<T>(&self, value: T) -> ArenaBox<'_, T> {
        ArenaBox::new_in(value, &self.bump)
    }

    // 专门为数组优化的版本
    pub fn alloc_array<T: Copy + Default>(&self, len: usize) -> &mut [T] {
        self.bump.alloc_slice_fill_copy(len, T::default())
    }

    pub fn memory_usage(&self) -> usize {
        self.bump.allocated_bytes()
    }
}
