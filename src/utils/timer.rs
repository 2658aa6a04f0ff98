use std::time::Instant;

/// 作用域计时，析构时以 trace 级别输出耗时
pub struct ScopeTimer {
    label: &'static str,
    start: Instant,
}

impl ScopeTimer {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        log::trace!("{} 耗时 {:?}", self.label, self.start.elapsed());
    }
}
