// 分片计划
//
// 按固定分片大小把文件字节范围切成有序分片，并维护
// 待传/在传/已完成三态，供并发调度去重。
//
// 计划一经计算不可变，满足三条不变式：
// - 各分片字节范围首尾相接（无空洞）
// - 互不重叠
// - 并集恰为完整文件长度

use std::ops::Range;
use tracing::debug;

/// 单个分片
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 分片索引
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
}

impl Chunk {
    fn new(index: usize, range: Range<u64>) -> Self {
        Self { index, range }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }
}

/// 分片状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// 待上传
    Pending,
    /// 正在上传（防止重复调度）
    Uploading,
    /// 已完成
    Completed,
}

/// 分片计划
///
/// 范围切分在构造时一次完成；之后只有状态位变化。
#[derive(Debug)]
pub struct ChunkPlan {
    /// 所有分片（按索引有序）
    chunks: Vec<Chunk>,
    /// 各分片状态
    states: Vec<ChunkState>,
    /// 文件总大小
    total_size: u64,
}

impl ChunkPlan {
    /// 计算分片计划
    ///
    /// # 参数
    /// * `total_size` - 文件总大小（字节），必须大于 0
    /// * `chunk_size` - 分片大小（字节），必须大于 0
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        debug_assert!(total_size > 0 && chunk_size > 0);

        let mut chunks = Vec::new();
        let mut offset = 0u64;
        let mut index = 0;

        while offset < total_size {
            let end = std::cmp::min(offset + chunk_size, total_size);
            chunks.push(Chunk::new(index, offset..end));
            offset = end;
            index += 1;
        }

        debug!(
            "分片计划: 总大小={} bytes, 分片大小={} bytes, 分片数={}",
            total_size,
            chunk_size,
            chunks.len()
        );

        let states = vec![ChunkState::Pending; chunks.len()];
        Self {
            chunks,
            states,
            total_size,
        }
    }

    /// 分片数量
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// 文件总大小
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 所有分片
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// 认领下一个待上传分片并标记为在传
    pub fn claim_next(&mut self) -> Option<Chunk> {
        let index = self
            .states
            .iter()
            .position(|s| *s == ChunkState::Pending)?;
        self.states[index] = ChunkState::Uploading;
        Some(self.chunks[index].clone())
    }

    /// 上传失败，归还分片（回到待传态）
    pub fn release(&mut self, index: usize) {
        if let Some(state) = self.states.get_mut(index) {
            if *state == ChunkState::Uploading {
                *state = ChunkState::Pending;
            }
        }
    }

    /// 标记分片完成
    pub fn mark_completed(&mut self, index: usize) {
        if let Some(state) = self.states.get_mut(index) {
            *state = ChunkState::Completed;
        }
    }

    /// 已完成分片数
    pub fn completed_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == ChunkState::Completed)
            .count()
    }

    /// 已提交字节数（仅统计已完成分片，与完成顺序无关）
    pub fn committed_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .zip(&self.states)
            .filter(|(_, s)| **s == ChunkState::Completed)
            .map(|(c, _)| c.size())
            .sum()
    }

    /// 是否全部完成
    pub fn is_completed(&self) -> bool {
        self.states.iter().all(|s| *s == ChunkState::Completed)
    }
}
