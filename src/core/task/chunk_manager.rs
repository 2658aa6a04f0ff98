use bytes::Bytes;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::state::ByteRange;

/// 剩余范围游标，按分块大小依次切出子范围
#[derive(Debug, Clone, Default)]
pub struct ChunkCursor {
    offset: u64,
    remaining: u64,
    next_order: u64,
}

impl ChunkCursor {
    pub fn new(range: ByteRange) -> Self {
        Self {
            offset: range.offset,
            remaining: range.size,
            next_order: 0,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// 已切出的分块数
    pub fn created(&self) -> u64 {
        self.next_order
    }

    /// 切出下一块，返回 `(写入序号, 范围)`
    pub fn next_chunk(&mut self, chunk_size: u64) -> Option<(u64, ByteRange)> {
        if self.remaining == 0 || chunk_size == 0 {
            return None;
        }
        let size = self.remaining.min(chunk_size);
        let range = ByteRange::new(self.offset, size);
        let order = self.next_order;
        self.offset += size;
        self.remaining -= size;
        self.next_order += 1;
        Some((order, range))
    }
}

/// 已完成但尚未写出的分块；`body` 为 `None` 表示失败或被取消
#[derive(Debug)]
pub struct ReadyChunk {
    pub order: u64,
    pub range: ByteRange,
    pub body: Option<Bytes>,
}

impl PartialEq for ReadyChunk {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for ReadyChunk {}

impl PartialOrd for ReadyChunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyChunk {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.cmp(&other.order)
    }
}

/// 按写入序号排列的最小堆
#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<Reverse<ReadyChunk>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: ReadyChunk) {
        self.heap.push(Reverse(chunk));
    }

    pub fn peek_order(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(chunk)| chunk.order)
    }

    /// 仅当最小序号等于 `order` 时弹出
    pub fn pop_if(&mut self, order: u64) -> Option<ReadyChunk> {
        if self.peek_order() == Some(order) {
            self.heap.pop().map(|Reverse(chunk)| chunk)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_tiles_range() {
        let mut cursor = ChunkCursor::new(ByteRange::new(1000, 200 * 1024));
        let mut chunks = Vec::new();
        while let Some(chunk) = cursor.next_chunk(64 * 1024) {
            chunks.push(chunk);
        }

        assert_eq!(chunks.len(), 4);
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.created(), 4);

        let mut expected_offset = 1000;
        for (i, (order, range)) in chunks.iter().enumerate() {
            assert_eq!(*order, i as u64);
            assert_eq!(range.offset, expected_offset);
            expected_offset = range.end();
        }
        assert_eq!(expected_offset, 1000 + 200 * 1024);
        assert_eq!(chunks[3].1.size, 8 * 1024);
    }

    #[test]
    fn test_cursor_empty_range() {
        let mut cursor = ChunkCursor::new(ByteRange::new(5, 0));
        assert_eq!(cursor.next_chunk(10), None);
        assert_eq!(cursor.created(), 0);
    }

    #[test]
    fn test_ready_queue_releases_in_order() {
        let mut queue = ReadyQueue::new();
        for order in [3u64, 0, 2] {
            queue.push(ReadyChunk {
                order,
                range: ByteRange::new(order * 10, 10),
                body: None,
            });
        }

        assert_eq!(queue.peek_order(), Some(0));
        assert!(queue.pop_if(0).is_some());
        assert!(queue.pop_if(1).is_none());

        queue.push(ReadyChunk {
            order: 1,
            range: ByteRange::new(10, 10),
            body: Some(Bytes::from_static(b"0123456789")),
        });
        let released: Vec<u64> = (1..4)
            .map(|order| queue.pop_if(order).map(|c| c.order).unwrap())
            .collect();
        assert_eq!(released, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }
}
