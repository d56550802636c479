//! `inbound_read_cycle` 集成测试：在事件循环上驱动“分配器 + 缓冲 + 解码器”的完整读路径。
//!
//! # 测试目标（Why）
//! - 读周期受 `cycle_cap` 约束，额度用尽时让出，下一次就绪继续读取；
//! - 部分读取意味着暂时读空，立即结束本轮；
//! - 对端关闭时解码器恰好收到一次流关闭通知，之后的读周期被拒绝。

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use spark_buffer::{CursorBuffer, RecyclingAllocator};
use spark_codec_replay::{
    DecodeInterrupt, InboundChannel, ReadCycleOutcome, RecvSource, ReplayContext, ReplayDecoder,
    ReplayingDecoder,
};
use spark_core::{CoreError, CursorBuf, MockClock, error::codes};
use spark_reactor::{EventLoop, MaxBytesRecvAllocator, RecvOutcome};

/// 内存中的字节源：按 `max` 截取待读字节，读空后根据 `eof` 返回关闭或 `WouldBlock`。
#[derive(Default)]
struct MemorySource {
    pending: VecDeque<u8>,
    eof: bool,
}

impl RecvSource for MemorySource {
    fn recv(&mut self, buf: &mut CursorBuffer, max: usize) -> RecvOutcome {
        if self.pending.is_empty() {
            return if self.eof {
                RecvOutcome::Closed
            } else {
                RecvOutcome::WouldBlock
            };
        }
        let n = max.min(self.pending.len());
        let chunk: Vec<u8> = self.pending.drain(..n).collect();
        buf.put_slice(&chunk);
        RecvOutcome::Read(n)
    }
}

/// 1 字节长度前缀帧。
struct ShortFrames;

impl ReplayDecoder for ShortFrames {
    type State = ();
    type Message = String;

    fn decode(&mut self, cx: &mut ReplayContext<'_, (), String>) -> Result<(), DecodeInterrupt> {
        let len = cx.read_u8()?;
        let body = cx.read_bytes(usize::from(len))?;
        cx.emit(String::from_utf8_lossy(&body).into_owned());
        Ok(())
    }
}

fn short_frame(body: &str) -> Vec<u8> {
    let mut bytes = vec![body.len() as u8];
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

type Channel = InboundChannel<MemorySource, RecyclingAllocator, ShortFrames>;

fn channel(pool: &RecyclingAllocator, data: Vec<u8>, eof: bool) -> Channel {
    let recv = MaxBytesRecvAllocator::new(8, 4).expect("合法上限");
    InboundChannel::new(
        MemorySource {
            pending: data.into(),
            eof,
        },
        pool.clone(),
        &recv,
        ReplayingDecoder::new(ShortFrames, ()),
    )
}

#[test]
fn read_cycles_run_as_loop_tasks() {
    let mut event_loop = EventLoop::new(Arc::new(MockClock::new()));
    let pool = RecyclingAllocator::new();
    let mut data = short_frame("hello");
    data.extend(short_frame("rust"));

    let channel = Arc::new(Mutex::new(channel(&pool, data, true)));
    let messages = Arc::new(Mutex::new(Vec::<String>::new()));
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    // 每次“读就绪”都以任务形式投递到循环上。
    for _ in 0..3 {
        let channel = Arc::clone(&channel);
        let messages = Arc::clone(&messages);
        let outcomes = Arc::clone(&outcomes);
        event_loop
            .submit(move || {
                let mut sink = messages.lock();
                let outcome = channel.lock().read_cycle(&mut *sink).expect("读周期");
                outcomes.lock().push(outcome);
            })
            .expect("投递读任务");
    }
    assert_eq!(event_loop.run_pending_tasks(), 3);

    // 11 字节：第一轮读满 8 字节额度，第二轮部分读取，第三轮读到关闭。
    assert_eq!(
        *outcomes.lock(),
        [
            ReadCycleOutcome::BudgetExhausted,
            ReadCycleOutcome::Drained,
            ReadCycleOutcome::Closed,
        ]
    );
    assert_eq!(*messages.lock(), ["hello", "rust"]);
    assert!(channel.lock().is_closed());
    assert_eq!(pool.statistics().active_leases, 0);
}

#[test]
fn would_block_ends_cycle_without_closing() {
    let pool = RecyclingAllocator::new();
    let mut channel = channel(&pool, short_frame("ab"), false);
    let mut out = Vec::new();

    assert_eq!(
        channel.read_cycle(&mut out).expect("读周期"),
        ReadCycleOutcome::Drained
    );
    assert_eq!(out, ["ab"]);
    assert_eq!(
        channel.read_cycle(&mut out).expect("读周期"),
        ReadCycleOutcome::Drained
    );
    assert!(!channel.is_closed());
}

#[test]
fn read_after_close_is_rejected() {
    let pool = RecyclingAllocator::new();
    let mut channel = channel(&pool, Vec::new(), true);
    let mut out: Vec<String> = Vec::new();

    assert_eq!(
        channel.read_cycle(&mut out).expect("读周期"),
        ReadCycleOutcome::Closed
    );
    let err: CoreError = channel.read_cycle(&mut out).expect_err("关闭后拒绝读取");
    assert_eq!(err.code(), codes::STREAM_CLOSED);
}

/// 读取失败原样返回，且不通知解码器流关闭。
#[test]
fn transport_failure_surfaces_to_caller() {
    struct Failing;

    impl RecvSource for Failing {
        fn recv(&mut self, _buf: &mut CursorBuffer, _max: usize) -> RecvOutcome {
            RecvOutcome::Failed(CoreError::new(codes::TRANSPORT_IO, "connection reset"))
        }
    }

    let recv = MaxBytesRecvAllocator::default();
    let mut channel = InboundChannel::new(
        Failing,
        RecyclingAllocator::new(),
        &recv,
        ReplayingDecoder::new(ShortFrames, ()),
    );
    let err = channel
        .read_cycle(&mut Vec::<String>::new())
        .expect_err("读取失败必须返回");
    assert_eq!(err.code(), codes::TRANSPORT_IO);
    assert!(!channel.is_closed());
    assert_eq!(channel.decoder().cumulated_bytes(), 0);
}

#[test]
fn fed_buffers_keep_cursor_invariant() {
    let pool = RecyclingAllocator::new();
    let mut channel = channel(&pool, vec![3, b'x'], false);
    let mut out: Vec<String> = Vec::new();
    channel.read_cycle(&mut out).expect("读周期");
    assert!(out.is_empty());
    let rest = channel.decoder_mut().take_remaining().expect("残留字节");
    assert_eq!(rest.readable(), &[3, b'x']);
    assert!(rest.read_cursor() <= rest.write_cursor());
}
