use crate::obj::options::ReadOptions;
use crate::obj::slice::Slice;
use crate::obj::status::Status;
use crate::table::iterator::Iter;

/// 根据 index 中的 value（编码后的 BlockHandle）打开对应 data block 的迭代器
pub type BlockFunction = Box<dyn Fn(&ReadOptions, &Slice) -> Box<dyn Iter>>;

/// index 迭代器的每个 value 指向一个 data block，两层拼成一个完整的有序序列
pub struct TwoLevelIterator {
    block_function: BlockFunction,
    read_options: ReadOptions,
    status: Status,
    index_iter_: Box<dyn Iter>,
    data_iter_: Option<Box<dyn Iter>>,
    // data_iter_ 对应的 handle，相同时不必重新打开
    data_block_handle_: Slice,
}

impl TwoLevelIterator {
    pub fn new(
        index_iter: Box<dyn Iter>,
        block_function: BlockFunction,
        read_options: ReadOptions,
    ) -> TwoLevelIterator {
        TwoLevelIterator {
            block_function,
            read_options,
            status: Status::ok(),
            index_iter_: index_iter,
            data_iter_: None,
            data_block_handle_: Slice::new_empty(),
        }
    }

    fn save_error(&mut self, s: Status) {
        if self.status.is_ok() && !s.is_ok() {
            self.status = s;
        }
    }

    fn set_data_iterator(&mut self, data_iter: Option<Box<dyn Iter>>) {
        // 丢弃旧迭代器前记下它的错误
        if let Some(old) = self.data_iter_.take() {
            self.save_error(old.status());
        }
        self.data_iter_ = data_iter;
    }

    fn data_valid(&self) -> bool {
        self.data_iter_.as_ref().is_some_and(|iter| iter.valid())
    }

    fn init_data_block(&mut self) {
        if !self.index_iter_.valid() {
            self.set_data_iterator(None);
            return;
        }
        let handle = self.index_iter_.value();
        if self.data_iter_.is_some() && handle == self.data_block_handle_ {
            // 已经在这个 block 上
            return;
        }
        let iter = (self.block_function)(&self.read_options, &handle);
        self.data_block_handle_ = handle;
        self.set_data_iterator(Some(iter));
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while !self.data_valid() {
            if !self.index_iter_.valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter_.next();
            self.init_data_block();
            if let Some(data_iter) = self.data_iter_.as_mut() {
                data_iter.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while !self.data_valid() {
            if !self.index_iter_.valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter_.prev();
            self.init_data_block();
            if let Some(data_iter) = self.data_iter_.as_mut() {
                data_iter.seek_to_last();
            }
        }
    }
}

impl Iter for TwoLevelIterator {
    fn valid(&self) -> bool {
        self.data_valid()
    }

    fn seek_to_first(&mut self) {
        self.index_iter_.seek_to_first();
        self.init_data_block();
        if let Some(data_iter) = self.data_iter_.as_mut() {
            data_iter.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter_.seek_to_last();
        self.init_data_block();
        if let Some(data_iter) = self.data_iter_.as_mut() {
            data_iter.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &Slice) {
        self.index_iter_.seek(target);
        self.init_data_block();
        if let Some(data_iter) = self.data_iter_.as_mut() {
            data_iter.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(data_iter) = self.data_iter_.as_mut() {
            data_iter.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(data_iter) = self.data_iter_.as_mut() {
            data_iter.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> Slice {
        match &self.data_iter_ {
            Some(data_iter) => data_iter.key(),
            None => Slice::new_empty(),
        }
    }

    fn value(&self) -> Slice {
        match &self.data_iter_ {
            Some(data_iter) => data_iter.value(),
            None => Slice::new_empty(),
        }
    }

    fn status(&self) -> Status {
        let index_status = self.index_iter_.status();
        if !index_status.is_ok() {
            return index_status;
        }
        if let Some(data_iter) = &self.data_iter_ {
            let data_status = data_iter.status();
            if !data_status.is_ok() {
                return data_status;
            }
        }
        self.status.clone()
    }
}
