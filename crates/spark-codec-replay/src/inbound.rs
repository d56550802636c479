//! 入站读路径：把接收分配器、游标缓冲与重放式解码器串成一次读周期。
//!
//! # 模块定位（Why）
//! - 具体的套接字绑定不在本 crate 范围内，这里只定义其边界 [`RecvSource`]，
//!   并给出标准的读周期驱动 [`InboundChannel::read_cycle`]；
//! - 读周期应作为任务运行在事件循环上，保证同一通道的读回调与解码永不并发。

use std::io;

use spark_buffer::CursorBuffer;
use spark_core::{BufferAllocator, CoreError, error::codes};
use spark_reactor::{MaxBytesRecvAllocator, MaxBytesRecvHandle, RecvOutcome};
use tracing::debug;

use crate::{
    decoder::{ReplayDecoder, ReplayingDecoder},
    error::ReplayError,
    sink::MessageSink,
};

/// 传输层读取边界：向缓冲写入至多 `max` 字节并报告结果。
pub trait RecvSource {
    fn recv(&mut self, buf: &mut CursorBuffer, max: usize) -> RecvOutcome;
}

/// 把任意 [`io::Read`] 适配为 [`RecvSource`]。
///
/// - `Ok(0)` 视为对端关闭；
/// - `WouldBlock` 视为暂时无数据；
/// - `Interrupted` 自动重试；
/// - 其它错误包装为 `transport.io` 错误码。
#[derive(Debug)]
pub struct IoRecvSource<R> {
    reader: R,
}

impl<R> IoRecvSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: io::Read> RecvSource for IoRecvSource<R> {
    fn recv(&mut self, buf: &mut CursorBuffer, max: usize) -> RecvOutcome {
        loop {
            match buf.fill_from(max, |dst| self.reader.read(dst)) {
                Ok(0) => return RecvOutcome::Closed,
                Ok(n) => return RecvOutcome::Read(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return RecvOutcome::WouldBlock;
                }
                Err(err) => {
                    return RecvOutcome::Failed(
                        CoreError::new(codes::TRANSPORT_IO, format!("read failed: {err}"))
                            .with_cause(err),
                    );
                }
            }
        }
    }
}

/// 一次读周期的结束方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadCycleOutcome {
    /// 本轮额度用尽，通道可能仍有数据，应在下一轮继续读取。
    BudgetExhausted,
    /// 通道暂时读空（部分读取或 `WouldBlock`），等待下一次就绪。
    Drained,
    /// 对端关闭，解码器已收到流关闭通知。
    Closed,
}

/// 单个通道的入站读路径。
///
/// # 教案式说明
/// - **步骤 (How)**：`reset` → 按 `next_guess` 分配缓冲 → 读取 → 记录尝试与结果
///   → 把缓冲投喂给解码器 → 依据 `should_continue_reading` 决定是否继续；
/// - **契约 (What)**：
///   - 读到 `Closed` 时恰好调用一次 `on_stream_closed`，之后的读周期返回 `protocol.stream_closed`；
///   - 解码失败与读取失败都会立即结束本轮，并以 [`CoreError`] 返回，调用方应关闭通道。
pub struct InboundChannel<S, A, D>
where
    D: ReplayDecoder,
{
    source: S,
    allocator: A,
    recv: MaxBytesRecvHandle,
    decoder: ReplayingDecoder<D>,
}

impl<S, A, D> InboundChannel<S, A, D>
where
    S: RecvSource,
    A: BufferAllocator<Buffer = CursorBuffer>,
    D: ReplayDecoder,
{
    pub fn new(
        source: S,
        allocator: A,
        recv: &MaxBytesRecvAllocator,
        decoder: ReplayingDecoder<D>,
    ) -> Self {
        Self {
            source,
            allocator,
            recv: recv.new_handle(),
            decoder,
        }
    }

    pub fn decoder(&self) -> &ReplayingDecoder<D> {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut ReplayingDecoder<D> {
        &mut self.decoder
    }

    /// 是否已读到流结束。
    pub fn is_closed(&self) -> bool {
        self.decoder.is_closed()
    }

    /// 执行一次读周期，解出的消息按顺序交给 `sink`。
    pub fn read_cycle<K>(&mut self, sink: &mut K) -> Result<ReadCycleOutcome, CoreError>
    where
        K: MessageSink<D::Message> + ?Sized,
    {
        if self.decoder.is_closed() {
            return Err(ReplayError::StreamClosed.into());
        }
        self.recv.reset();
        let outcome = self.read_loop(sink);
        self.recv.read_complete();
        outcome
    }

    fn read_loop<K>(&mut self, sink: &mut K) -> Result<ReadCycleOutcome, CoreError>
    where
        K: MessageSink<D::Message> + ?Sized,
    {
        loop {
            let guess = self.recv.next_guess();
            let mut buf = self.recv.allocate(&self.allocator)?;
            self.recv.record_attempted(guess);
            let outcome = self.source.recv(&mut buf, guess);
            self.recv.record_actual(&outcome);

            match outcome {
                RecvOutcome::Read(_) => {
                    self.decoder.feed(buf, sink)?;
                    if !self.recv.should_continue_reading() {
                        return Ok(if self.recv.remaining_bytes() == 0 {
                            ReadCycleOutcome::BudgetExhausted
                        } else {
                            ReadCycleOutcome::Drained
                        });
                    }
                }
                RecvOutcome::WouldBlock => return Ok(ReadCycleOutcome::Drained),
                RecvOutcome::Closed => {
                    drop(buf);
                    debug!(total_read = self.recv.total_bytes_read(), "inbound stream closed");
                    self.decoder.on_stream_closed(sink)?;
                    return Ok(ReadCycleOutcome::Closed);
                }
                RecvOutcome::Failed(err) => return Err(err),
            }
        }
    }
}
