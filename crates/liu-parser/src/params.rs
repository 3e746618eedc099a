//! 流参数与帧参数存储.
//!
//! 流参数 (每个序列头一份) 以 `Arc` 与已提交的帧共享; 入口点等后续更新
//! 采用写时复制, 已提交的帧始终保留解码时所用的那一份.
//! 帧参数 (每个图像或场一份) 在提交时整体移入解析结果, 存储槽随即清空.

use std::sync::Arc;

/// 流参数与帧参数存储
#[derive(Debug, Clone)]
pub struct ParameterStore<S, F> {
    stream: Option<Arc<S>>,
    frame: Option<F>,
}

impl<S, F> Default for ParameterStore<S, F> {
    fn default() -> Self {
        Self {
            stream: None,
            frame: None,
        }
    }
}

impl<S: Clone, F: Default> ParameterStore<S, F> {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 以新的流参数替换当前流参数, 旧记录仍由已提交的帧持有
    pub fn replace_stream(&mut self, params: S) {
        self.stream = Some(Arc::new(params));
    }

    /// 当前流参数
    pub fn stream(&self) -> Option<&Arc<S>> {
        self.stream.as_ref()
    }

    /// 可写的流参数 (写时复制)
    pub fn stream_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut().map(Arc::make_mut)
    }

    /// 当前帧参数
    pub fn frame(&self) -> Option<&F> {
        self.frame.as_ref()
    }

    /// 可写的帧参数
    pub fn frame_mut(&mut self) -> Option<&mut F> {
        self.frame.as_mut()
    }

    /// 分配一份新的帧参数, 丢弃未提交的旧帧参数
    pub fn new_frame(&mut self) -> &mut F {
        self.frame.insert(F::default())
    }

    /// 以指定帧参数填充存储槽
    pub fn set_frame(&mut self, frame: F) {
        self.frame = Some(frame);
    }

    /// 取出帧参数, 存储槽置空
    pub fn take_frame(&mut self) -> Option<F> {
        self.frame.take()
    }

    /// 清空流参数与帧参数
    pub fn clear(&mut self) {
        self.stream = None;
        self.frame = None;
    }
}
