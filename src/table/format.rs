use crate::obj::options::{CompressionType, ReadOptions};
use crate::obj::slice::Slice;
use crate::obj::status::Status;
use crate::util::coding::{decode_fixed32, get_varint64, put_fixed32, put_varint64};
use crate::util::crc32c;
use crate::util::random_access_file::RandomAccessFile;
use bytes::{Bytes, BytesMut};
use num_traits::FromPrimitive;

/// 一个 BlockHandle 编码后的最大长度：两个 varint64
pub const K_MAX_ENCODED_LENGTH: usize = 10 + 10;

/// 指向文件中一个 block 的 (offset, size)，size 不含 trailer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    offset: u64,
    size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> BlockHandle {
        BlockHandle { offset, size }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn encode_to(&self, dst: &mut BytesMut) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    pub fn decode_from(input: &mut Slice) -> Result<BlockHandle, Status> {
        let mut handle = BlockHandle::default();
        if get_varint64(input, &mut handle.offset) && get_varint64(input, &mut handle.size) {
            Ok(handle)
        } else {
            Err(Status::corruption("bad block handle", None))
        }
    }
}

/// footer 固定长度：两个补齐的 handle + 8 字节 magic
pub const K_ENCODED_LENGTH: usize = 2 * K_MAX_ENCODED_LENGTH + 8;

pub const K_TABLE_MAGIC_NUMBER: u64 = 0xdb4775248b80fb57;

// 1-byte type + 32-bit crc
pub const K_BLOCK_TRAILER_SIZE: usize = 5;

/// 文件尾部，记录 meta_index block 和 index block 的位置
#[derive(Debug, Clone, Default)]
pub struct Footer {
    meta_index_handle: BlockHandle,
    index_handle: BlockHandle,
}

impl Footer {
    pub fn new(meta_index_handle: BlockHandle, index_handle: BlockHandle) -> Footer {
        Footer {
            meta_index_handle,
            index_handle,
        }
    }

    pub fn meta_index_handle(&self) -> &BlockHandle {
        &self.meta_index_handle
    }

    pub fn index_handle(&self) -> &BlockHandle {
        &self.index_handle
    }

    pub fn encode_to(&self, dst: &mut BytesMut) {
        let original_size = dst.len();
        self.meta_index_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        dst.resize(original_size + 2 * K_MAX_ENCODED_LENGTH, 0);
        put_fixed32(dst, (K_TABLE_MAGIC_NUMBER & 0xffffffff) as u32);
        put_fixed32(dst, (K_TABLE_MAGIC_NUMBER >> 32) as u32);
        debug_assert_eq!(dst.len(), original_size + K_ENCODED_LENGTH);
    }

    pub fn decode_from(input: &Slice) -> Result<Footer, Status> {
        if input.size() < K_ENCODED_LENGTH {
            return Err(Status::corruption(
                "input is too short to be an sstable",
                None,
            ));
        }
        let magic_ptr = &input.data()[K_ENCODED_LENGTH - 8..];
        let magic_lo = decode_fixed32(magic_ptr);
        let magic_hi = decode_fixed32(&magic_ptr[4..]);
        let magic = ((magic_hi as u64) << 32) | (magic_lo as u64);
        if magic != K_TABLE_MAGIC_NUMBER {
            return Err(Status::corruption(
                "not an sstable (bad magic number)",
                None,
            ));
        }
        let mut handles = Slice::new_from_slice(input, 0..2 * K_MAX_ENCODED_LENGTH);
        let meta_index_handle = BlockHandle::decode_from(&mut handles)?;
        let index_handle = BlockHandle::decode_from(&mut handles)?;
        Ok(Footer {
            meta_index_handle,
            index_handle,
        })
    }
}

/// 读出并校验、解压后的 block 内容
#[derive(Debug, Clone)]
pub struct BlockContents {
    pub data: Bytes,
}

/// 读取 handle 指向的 block，按需校验 crc 并解压
pub fn read_block(
    file: &dyn RandomAccessFile,
    options: &ReadOptions,
    handle: &BlockHandle,
) -> Result<BlockContents, Status> {
    let n = handle.size() as usize;
    let contents = file.read(handle.offset(), n + K_BLOCK_TRAILER_SIZE)?;
    if contents.size() != n + K_BLOCK_TRAILER_SIZE {
        return Err(Status::corruption("truncated block read", None));
    }

    let data = contents.data();
    if options.verify_checksums {
        let crc = crc32c::unmask(decode_fixed32(&data[n + 1..]));
        let actual = crc32c::value(&data[..n + 1]);
        if actual != crc {
            return Err(Status::corruption("block checksum mismatch", None));
        }
    }

    match CompressionType::from_u8(data[n]) {
        Some(CompressionType::None) => Ok(BlockContents {
            data: contents.data_bytes.slice(0..n),
        }),
        Some(CompressionType::Snappy) => {
            let raw = &data[..n];
            let ulength = snap::raw::decompress_len(raw).map_err(|_| {
                Status::corruption("corrupted compressed block contents", None)
            })?;
            let mut ubuf = vec![0u8; ulength];
            snap::raw::Decoder::new()
                .decompress(raw, &mut ubuf)
                .map_err(|_| Status::corruption("corrupted compressed block contents", None))?;
            Ok(BlockContents {
                data: Bytes::from(ubuf),
            })
        }
        None => Err(Status::corruption("bad block type", None)),
    }
}
