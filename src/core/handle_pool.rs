//! 连接句柄池：复用连接，并限制同时在用的数量

/// 有上限的连接句柄池
///
/// 在用数量超过上限或重复归还都属于调度逻辑错误，直接 panic。
#[derive(Debug)]
pub struct HandlePool<C> {
    idle: Vec<C>,
    capacity: usize,
    in_use: usize,
    peak_in_use: usize,
}

impl<C> HandlePool<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Vec::with_capacity(capacity),
            capacity,
            in_use: 0,
            peak_in_use: 0,
        }
    }

    /// 取一个空闲句柄，没有则用 `open` 新建
    pub fn acquire(&mut self, open: impl FnOnce() -> C) -> C {
        assert!(
            self.in_use < self.capacity,
            "连接句柄超出上限: 在用 {} / 上限 {}",
            self.in_use,
            self.capacity
        );
        let handle = match self.idle.pop() {
            Some(handle) => handle,
            None => open(),
        };
        self.in_use += 1;
        self.peak_in_use = self.peak_in_use.max(self.in_use);
        handle
    }

    pub fn release(&mut self, handle: C) {
        assert!(self.in_use > 0, "归还了未借出的连接句柄");
        self.in_use -= 1;
        if self.idle.len() < self.capacity {
            self.idle.push(handle);
        }
    }

    pub fn free_count(&self) -> usize {
        self.capacity.saturating_sub(self.in_use)
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn peak_in_use(&self) -> usize {
        self.peak_in_use
    }

    /// 只在没有句柄借出时生效
    pub fn set_capacity(&mut self, capacity: usize) -> bool {
        if self.in_use > 0 {
            return false;
        }
        self.capacity = capacity;
        self.idle.truncate(capacity);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_reuses_idle_handles() {
        let mut pool = HandlePool::new(2);
        let mut opened = 0;

        let a = pool.acquire(|| {
            opened += 1;
            1
        });
        let b = pool.acquire(|| {
            opened += 1;
            2
        });
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.in_use(), 2);

        pool.release(a);
        let c = pool.acquire(|| {
            opened += 1;
            3
        });
        assert_eq!(c, a);
        assert_eq!(opened, 2);

        pool.release(b);
        pool.release(c);
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.peak_in_use(), 2);
    }

    #[test]
    #[should_panic(expected = "超出上限")]
    fn test_acquire_beyond_capacity_panics() {
        let mut pool = HandlePool::new(1);
        let _a = pool.acquire(|| 1);
        let _b = pool.acquire(|| 2);
    }

    #[test]
    #[should_panic(expected = "未借出")]
    fn test_double_release_panics() {
        let mut pool: HandlePool<u32> = HandlePool::new(1);
        let a = pool.acquire(|| 1);
        pool.release(a);
        pool.release(a);
    }

    #[test]
    fn test_set_capacity_only_when_idle() {
        let mut pool = HandlePool::new(4);
        let a = pool.acquire(|| 0u8);
        assert!(!pool.set_capacity(2));
        pool.release(a);
        assert!(pool.set_capacity(2));
        assert_eq!(pool.free_count(), 2);
    }
}
