/// 解码消息的下游接收者，按产出顺序逐条交付。
pub trait MessageSink<M> {
    fn deliver(&mut self, message: M);
}

impl<M> MessageSink<M> for Vec<M> {
    fn deliver(&mut self, message: M) {
        self.push(message);
    }
}

/// 把闭包适配为 [`MessageSink`]。
pub struct FnSink<F>(pub F);

impl<M, F> MessageSink<M> for FnSink<F>
where
    F: FnMut(M),
{
    fn deliver(&mut self, message: M) {
        (self.0)(message);
    }
}
