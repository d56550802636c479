use std::mem;

use bytes::Bytes;
use spark_buffer::CursorBuffer;
use spark_core::CursorBuf;

use crate::error::DecodeInterrupt;

/// 检查点：读游标位置与截至该位置已产出的消息数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    pub(crate) cursor: usize,
    pub(crate) emitted: usize,
}

/// `ReplayContext` 是解码逻辑看到的“字节总是足够”的视图。
///
/// # 设计背景（Why）
/// - 解码逻辑按字段顺序读取即可，读越过已到达字节时由读取方法返回
///   [`DecodeInterrupt::NeedMoreData`]，外层解码器负责倒回检查点并等待更多字节；
/// - 状态、检查点与待交付消息都由解码器持有，本结构只在一次解码尝试期间借用它们。
///
/// # 契约说明（What）
/// - 在尝试解析一个尚未确定完整到达的变长字段前，应先调用 [`checkpoint`](Self::checkpoint)；
/// - 数据不足时，读游标倒回最近的检查点，检查点之后 `emit` 的消息一并撤销；
/// - 读取失败不会移动读游标。
pub struct ReplayContext<'a, S, M> {
    buf: &'a mut CursorBuffer,
    state: &'a mut S,
    out: &'a mut Vec<M>,
    checkpoint: &'a mut Checkpoint,
    terminated: bool,
}

impl<'a, S, M> ReplayContext<'a, S, M> {
    pub(crate) fn new(
        buf: &'a mut CursorBuffer,
        state: &'a mut S,
        out: &'a mut Vec<M>,
        checkpoint: &'a mut Checkpoint,
        terminated: bool,
    ) -> Self {
        Self {
            buf,
            state,
            out,
            checkpoint,
            terminated,
        }
    }

    /// 将当前读游标记录为数据不足时的回退目标。
    pub fn checkpoint(&mut self) {
        *self.checkpoint = Checkpoint {
            cursor: self.buf.read_cursor(),
            emitted: self.out.len(),
        };
    }

    /// 更新状态并记录检查点。
    pub fn checkpoint_with(&mut self, state: S) {
        *self.state = state;
        self.checkpoint();
    }

    /// 当前解码状态。
    pub fn state(&self) -> &S {
        self.state
    }

    /// 替换解码状态，返回旧值。
    pub fn set_state(&mut self, state: S) -> S {
        mem::replace(self.state, state)
    }

    /// 产出一条消息。
    pub fn emit(&mut self, message: M) {
        self.out.push(message);
    }

    /// 流是否已关闭：关闭后不会再有字节到达，数据不足只意味着尾部残缺。
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// 当前读游标。
    pub fn read_cursor(&self) -> usize {
        self.buf.read_cursor()
    }

    /// 实际已到达、尚未读取的字节数。
    pub fn actual_readable_bytes(&self) -> usize {
        self.buf.readable_bytes()
    }

    /// 实际已到达、尚未读取的字节。
    pub fn readable(&self) -> &[u8] {
        self.buf.readable()
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeInterrupt> {
        self.read_array::<1>().map(|[b]| b)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeInterrupt> {
        self.read_array().map(u16::from_be_bytes)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, DecodeInterrupt> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeInterrupt> {
        self.read_array().map(u32::from_be_bytes)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeInterrupt> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeInterrupt> {
        self.read_array().map(u64::from_be_bytes)
    }

    /// 查看下一个字节但不消费。
    pub fn peek_u8(&self) -> Result<u8, DecodeInterrupt> {
        self.buf
            .readable()
            .first()
            .copied()
            .ok_or(DecodeInterrupt::NeedMoreData)
    }

    /// 读取 `len` 字节并复制为独立的 `Bytes`。
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, DecodeInterrupt> {
        self.ensure(len)?;
        let bytes = Bytes::copy_from_slice(&self.buf.readable()[..len]);
        self.buf.advance(len)?;
        Ok(bytes)
    }

    /// 跳过 `len` 字节。
    pub fn skip(&mut self, len: usize) -> Result<(), DecodeInterrupt> {
        self.ensure(len)?;
        self.buf.advance(len)?;
        Ok(())
    }

    /// 在已到达的字节中查找 `byte`，返回相对读游标的偏移。
    pub fn index_of(&self, byte: u8) -> Option<usize> {
        self.buf.readable().iter().position(|b| *b == byte)
    }

    /// 读取到分隔符为止（不含分隔符），并消费分隔符；尚未出现分隔符时返回数据不足。
    pub fn read_until(&mut self, delimiter: u8) -> Result<Bytes, DecodeInterrupt> {
        let Some(pos) = self.index_of(delimiter) else {
            return Err(DecodeInterrupt::NeedMoreData);
        };
        let bytes = self.read_bytes(pos)?;
        self.skip(1)?;
        Ok(bytes)
    }

    fn ensure(&self, len: usize) -> Result<(), DecodeInterrupt> {
        if self.buf.readable_bytes() < len {
            return Err(DecodeInterrupt::NeedMoreData);
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeInterrupt> {
        self.ensure(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(&self.buf.readable()[..N]);
        self.buf.advance(N)?;
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_context<R>(
        bytes: &[u8],
        f: impl FnOnce(&mut ReplayContext<'_, u8, &'static str>) -> R,
    ) -> (R, CursorBuffer, Checkpoint, Vec<&'static str>) {
        let mut buf = CursorBuffer::from_slice(bytes);
        let mut state = 0u8;
        let mut out = Vec::new();
        let mut checkpoint = Checkpoint::default();
        let result = {
            let mut cx = ReplayContext::new(&mut buf, &mut state, &mut out, &mut checkpoint, false);
            f(&mut cx)
        };
        (result, buf, checkpoint, out)
    }

    #[test]
    fn short_read_signals_need_more_data_without_moving() {
        let (result, buf, _, _) = with_context(&[0x01, 0x02, 0x03], |cx| cx.read_u32());
        assert!(matches!(result, Err(DecodeInterrupt::NeedMoreData)));
        assert_eq!(buf.read_cursor(), 0);
    }

    #[test]
    fn integers_follow_requested_endianness() {
        let (result, _, _, _) = with_context(&[0x12, 0x34, 0x12, 0x34], |cx| {
            Ok::<_, DecodeInterrupt>((cx.read_u16()?, cx.read_u16_le()?))
        });
        assert_eq!(result.expect("读取成功"), (0x1234, 0x3412));
    }

    #[test]
    fn checkpoint_records_cursor_and_emitted() {
        let (_, _, checkpoint, out) = with_context(b"abc", |cx| {
            cx.skip(1).expect("跳过");
            cx.emit("first");
            cx.checkpoint_with(7);
            assert_eq!(*cx.state(), 7);
            assert_eq!(cx.set_state(9), 7);
        });
        assert_eq!(
            checkpoint,
            Checkpoint {
                cursor: 1,
                emitted: 1
            }
        );
        assert_eq!(out, ["first"]);
    }

    #[test]
    fn read_until_consumes_delimiter() {
        let (result, buf, _, _) = with_context(b"ab\ncd", |cx| cx.read_until(b'\n'));
        assert_eq!(result.expect("找到分隔符").as_ref(), b"ab");
        assert_eq!(buf.readable(), b"cd");
    }
}
