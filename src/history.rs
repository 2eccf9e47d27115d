use std::collections::VecDeque;

/// 曲线图保留的点数（每秒一个点）
pub const CHART_POINT_COUNT: usize = 20;

/// 定长滚动序列，满了之后丢弃最旧的点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySeries {
    points: VecDeque<u8>,
    capacity: usize,
}

impl HistorySeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 追加下一个点
    pub fn push(&mut self, value: u8) {
        if self.capacity == 0 {
            return;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(value);
    }

    /// 从旧到新遍历
    pub fn points(&self) -> impl Iterator<Item = u8> + '_ {
        self.points.iter().copied()
    }

    #[inline]
    pub fn latest(&self) -> Option<u8> {
        self.points.back().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistorySeries {
    fn default() -> Self {
        Self::new(CHART_POINT_COUNT)
    }
}
