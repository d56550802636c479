//! 重放式解码器。
//!
//! # 模块定位（Why）
//! - 流式协议的一帧可能分多次到达；让每个解码逻辑都自己做“够不够读”的判断既繁琐又易错；
//! - 本模块把到达的字节累积到同一块缓冲，反复驱动解码步骤，遇到数据不足就倒回检查点，
//!   等下一批字节到达后从检查点重新解析。
//!
//! # 结构概览（How）
//! - [`ReplayDecoder`]：协议方实现的单步解码逻辑；
//! - [`ReplayingDecoder`]：累积缓冲、检查点、状态与活性检查的驱动器。
//!
//! # 契约说明（What）
//! - 数据不足只撤销当次尝试，永远不会以错误形式暴露给调用方；
//! - 一次尝试既没消费字节也没改变状态时判定为契约违规，立即失败而非无限循环；
//! - 流关闭后不得再投喂，`on_stream_closed` 给解码逻辑最后一次机会处理剩余字节。

use std::{any::type_name, fmt::Debug, num::NonZeroUsize};

use spark_buffer::CursorBuffer;
use spark_core::CursorBuf;
use tracing::{debug, trace, warn};

use crate::{
    context::{Checkpoint, ReplayContext},
    error::{DecodeInterrupt, ReplayError},
    sink::MessageSink,
};

/// 累积缓冲保留未读字节时，每经过多少次投喂压缩一次已读前缀。
pub const DEFAULT_DISCARD_AFTER_READS: usize = 16;

/// 协议方实现的单步解码逻辑。
///
/// # 教案式说明
/// - **意图 (Why)**：解码逻辑只描述“如何从字节中读出一条消息”，不关心字节是否已全部到达；
/// - **契约 (What)**：
///   - 每次调用应至少消费字节、改变状态或产出消息之一，否则解码器报告契约违规；
///   - 读取方法返回 [`DecodeInterrupt::NeedMoreData`] 时直接用 `?` 传播；
///   - 解析变长字段前调用 `cx.checkpoint()`，使重放从该位置开始。
/// - **状态 (State)**：由调用方定义的枚举，解码器只做相等比较，用于活性检查。
pub trait ReplayDecoder {
    /// 多步协议中“解析到哪一步”的状态。
    type State: Clone + PartialEq + Debug;
    /// 解码产出的消息。
    type Message;

    /// 执行一次解码尝试。
    fn decode(
        &mut self,
        cx: &mut ReplayContext<'_, Self::State, Self::Message>,
    ) -> Result<(), DecodeInterrupt>;

    /// 流关闭时的最后一次解码，默认在仍有剩余字节时调用一次 [`decode`](Self::decode)。
    fn decode_last(
        &mut self,
        cx: &mut ReplayContext<'_, Self::State, Self::Message>,
    ) -> Result<(), DecodeInterrupt> {
        if cx.actual_readable_bytes() > 0 {
            self.decode(cx)
        } else {
            Ok(())
        }
    }
}

/// `ReplayingDecoder` 驱动 [`ReplayDecoder`]，向其呈现“字节总是足够”的假象。
///
/// # 设计背景（Why）
/// - 累积缓冲、检查点与状态只在事件循环线程上访问，结构体本身不加锁；
/// - 投喂的缓冲以所有权移动方式交给解码器，不存在两个组件同时认为自己独占同一区域。
///
/// # 逻辑解析（How）
/// 1. `feed` 把新缓冲并入累积缓冲：累积为空时直接接管，否则追加后释放输入；
/// 2. 每轮尝试开始时把检查点重置为当前读游标，并记录状态与可读字节数；
/// 3. 尝试返回数据不足：读游标倒回检查点，撤销检查点之后的消息，结束本次投喂；
/// 4. 尝试成功但没有消息：若字节与状态都未变化则契约违规，否则继续；
/// 5. 尝试产出消息：若读游标与状态都未变化则契约违规；单步模式下结束；
/// 6. 投喂结束后，累积缓冲读空即释放，否则按 `discard_after_reads` 节奏压缩。
///
/// # 风险提示（Trade-offs）
/// - 每次数据不足都会从检查点重新解析，帧很大且分片很碎时存在重复解析成本；
///   解码逻辑应在已确认完整的字段之后及时 `checkpoint`。
pub struct ReplayingDecoder<D: ReplayDecoder> {
    decoder: D,
    state: D::State,
    cumulation: Option<CursorBuffer>,
    checkpoint: Checkpoint,
    pending: Vec<D::Message>,
    single_decode: bool,
    discard_after_reads: usize,
    reads_since_discard: usize,
    closed: bool,
}

impl<D> ReplayingDecoder<D>
where
    D: ReplayDecoder,
{
    /// 以初始状态创建解码器。
    pub fn new(decoder: D, initial_state: D::State) -> Self {
        Self {
            decoder,
            state: initial_state,
            cumulation: None,
            checkpoint: Checkpoint::default(),
            pending: Vec::new(),
            single_decode: false,
            discard_after_reads: DEFAULT_DISCARD_AFTER_READS,
            reads_since_discard: 0,
            closed: false,
        }
    }

    /// 单步模式：每次投喂最多成功解码一次。
    pub fn set_single_decode(&mut self, single_decode: bool) {
        self.single_decode = single_decode;
    }

    pub fn is_single_decode(&self) -> bool {
        self.single_decode
    }

    /// 设置压缩已读前缀的投喂间隔。
    pub fn set_discard_after_reads(&mut self, reads: NonZeroUsize) {
        self.discard_after_reads = reads.get();
    }

    /// 当前解码状态。
    pub fn state(&self) -> &D::State {
        &self.state
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut D {
        &mut self.decoder
    }

    /// 累积缓冲中尚未解析的字节数。
    pub fn cumulated_bytes(&self) -> usize {
        self.cumulation
            .as_ref()
            .map_or(0, CursorBuf::readable_bytes)
    }

    /// 流是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 投喂一块新到达的缓冲，并把解出的消息按顺序交给 `sink`。
    ///
    /// # 契约说明
    /// - 数据不足时正常返回，未消费字节留待下一次投喂；
    /// - 失败前已产出的消息仍会交付；
    /// - 流关闭后调用返回 [`ReplayError::StreamClosed`]，输入缓冲被释放。
    pub fn feed<K>(&mut self, input: CursorBuffer, sink: &mut K) -> Result<(), ReplayError>
    where
        K: MessageSink<D::Message> + ?Sized,
    {
        if self.closed {
            warn!(decoder = type_name::<D>(), "feed after stream closed");
            return Err(ReplayError::StreamClosed);
        }
        if !input.is_readable() {
            return Ok(());
        }
        debug!(
            decoder = type_name::<D>(),
            incoming = input.readable_bytes(),
            cumulated = self.cumulated_bytes(),
            "feeding replaying decoder"
        );
        match self.cumulation.as_mut() {
            Some(cumulation) => cumulation.put_slice(input.readable()),
            None => self.cumulation = Some(input),
        }
        let result = self.call_decode(sink, false);
        self.after_feed();
        result
    }

    /// 以切片形式投喂，便于测试与非池化场景。
    pub fn feed_slice<K>(&mut self, bytes: &[u8], sink: &mut K) -> Result<(), ReplayError>
    where
        K: MessageSink<D::Message> + ?Sized,
    {
        self.feed(CursorBuffer::from_slice(bytes), sink)
    }

    /// 流关闭：给解码逻辑最后一次机会处理剩余字节。
    ///
    /// # 教案式说明
    /// - **步骤 (How)**：
    ///   1. 标记关闭，之后的 `feed` 一律拒绝；
    ///   2. 以“已终止”视图再驱动一轮普通解码，然后调用一次 `decode_last`；
    ///   3. 这两个阶段中的数据不足都被吞掉，因为不会再有字节到达；
    ///   4. 释放累积缓冲。
    /// - **契约 (What)**：重复调用是空操作；真实失败与契约违规照常返回。
    pub fn on_stream_closed<K>(&mut self, sink: &mut K) -> Result<(), ReplayError>
    where
        K: MessageSink<D::Message> + ?Sized,
    {
        if self.closed {
            debug!(decoder = type_name::<D>(), "stream already closed");
            return Ok(());
        }
        self.closed = true;

        if let Err(err) = self.call_decode(sink, true) {
            self.cumulation = None;
            return Err(err);
        }
        let mut cumulation = self
            .cumulation
            .take()
            .unwrap_or_else(|| CursorBuffer::unpooled(0));

        self.checkpoint = Checkpoint {
            cursor: cumulation.read_cursor(),
            emitted: 0,
        };
        let outcome = {
            let mut cx = ReplayContext::new(
                &mut cumulation,
                &mut self.state,
                &mut self.pending,
                &mut self.checkpoint,
                true,
            );
            self.decoder.decode_last(&mut cx)
        };
        let result = match outcome {
            Ok(()) => Ok(()),
            Err(DecodeInterrupt::NeedMoreData) => {
                trace!(
                    decoder = type_name::<D>(),
                    remaining = cumulation.readable_bytes(),
                    "discarding truncated trailing bytes"
                );
                self.pending.truncate(self.checkpoint.emitted);
                Ok(())
            }
            Err(DecodeInterrupt::Failed(err)) => Err(ReplayError::DecodeFailure(err)),
        };
        self.flush(sink);
        result
    }

    /// 取走尚未解析的字节，用于解码器被移除时把剩余数据交还上游。
    pub fn take_remaining(&mut self) -> Option<CursorBuffer> {
        self.reads_since_discard = 0;
        let mut remaining = self.cumulation.take()?;
        remaining.discard_read_bytes();
        remaining.is_readable().then_some(remaining)
    }

    fn call_decode<K>(&mut self, sink: &mut K, terminated: bool) -> Result<(), ReplayError>
    where
        K: MessageSink<D::Message> + ?Sized,
    {
        let Some(cumulation) = self.cumulation.as_mut() else {
            return Ok(());
        };

        while cumulation.is_readable() {
            let old_reader = cumulation.read_cursor();
            let old_readable = cumulation.readable_bytes();
            let old_state = self.state.clone();
            self.checkpoint = Checkpoint {
                cursor: old_reader,
                emitted: 0,
            };

            let outcome = {
                let mut cx = ReplayContext::new(
                    cumulation,
                    &mut self.state,
                    &mut self.pending,
                    &mut self.checkpoint,
                    terminated,
                );
                self.decoder.decode(&mut cx)
            };

            match outcome {
                Ok(()) => {}
                Err(DecodeInterrupt::NeedMoreData) => {
                    self.pending.truncate(self.checkpoint.emitted);
                    if let Err(err) = rewind(cumulation, self.checkpoint.cursor) {
                        flush(&mut self.pending, sink);
                        return Err(err);
                    }
                    trace!(
                        decoder = type_name::<D>(),
                        checkpoint = self.checkpoint.cursor,
                        "insufficient data, rewound to checkpoint"
                    );
                    flush(&mut self.pending, sink);
                    break;
                }
                Err(DecodeInterrupt::Failed(err)) => {
                    flush(&mut self.pending, sink);
                    return Err(ReplayError::DecodeFailure(err));
                }
            }

            let produced = self.pending.len();
            flush(&mut self.pending, sink);
            let state_unchanged = old_state == self.state;

            if produced == 0 {
                if old_readable == cumulation.readable_bytes() && state_unchanged {
                    return Err(violation::<D>(
                        "decode() consumed no bytes and did not change state",
                    ));
                }
                continue;
            }

            if old_reader == cumulation.read_cursor() && state_unchanged {
                return Err(violation::<D>(
                    "decode() produced a message without consuming input or changing state",
                ));
            }

            trace!(
                decoder = type_name::<D>(),
                produced,
                consumed = cumulation.read_cursor().saturating_sub(old_reader),
                "decode step produced messages"
            );

            if self.single_decode {
                break;
            }
        }
        Ok(())
    }

    fn after_feed(&mut self) {
        let drained = match self.cumulation.as_mut() {
            None => return,
            Some(cumulation) if !cumulation.is_readable() => true,
            Some(cumulation) => {
                self.reads_since_discard += 1;
                if self.reads_since_discard >= self.discard_after_reads {
                    self.reads_since_discard = 0;
                    cumulation.discard_read_bytes();
                }
                false
            }
        };
        if drained {
            self.reads_since_discard = 0;
            self.cumulation = None;
        }
    }

    fn flush<K>(&mut self, sink: &mut K)
    where
        K: MessageSink<D::Message> + ?Sized,
    {
        flush(&mut self.pending, sink);
    }
}

impl<D> ReplayingDecoder<D>
where
    D: ReplayDecoder,
    D::State: Default,
{
    /// 以默认状态创建解码器。
    pub fn with_default_state(decoder: D) -> Self {
        Self::new(decoder, D::State::default())
    }
}

impl<D> Debug for ReplayingDecoder<D>
where
    D: ReplayDecoder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayingDecoder")
            .field("decoder", &type_name::<D>())
            .field("state", &self.state)
            .field("cumulated_bytes", &self.cumulated_bytes())
            .field("single_decode", &self.single_decode)
            .field("closed", &self.closed)
            .finish()
    }
}

fn flush<M, K>(pending: &mut Vec<M>, sink: &mut K)
where
    K: MessageSink<M> + ?Sized,
{
    for message in pending.drain(..) {
        sink.deliver(message);
    }
}

/// 把读游标退回检查点；检查点越过写游标时以 `DecodeFailure` 报告。
fn rewind(cumulation: &mut CursorBuffer, cursor: usize) -> Result<(), ReplayError> {
    cumulation
        .set_read_cursor(cursor)
        .map_err(ReplayError::DecodeFailure)
}

fn violation<D>(detail: &'static str) -> ReplayError {
    let decoder = type_name::<D>();
    warn!(decoder, detail, "decoder contract violation");
    ReplayError::ContractViolation { decoder, detail }
}
