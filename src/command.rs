use futures::{
    FutureExt, Stream, StreamExt,
    stream::{BoxStream, select_all},
};

/// An asynchronous side effect that reports back through messages.
///
/// Views drive mutations, invalidations and uploads through commands so that
/// the result of each operation arrives as an ordinary message instead of a
/// future the view has to poll itself. A command is inert until its stream is
/// consumed, typically by [`Command::into_stream`] in the host's event loop.
///
/// # Examples
///
/// ```
/// use govai_query::command::Command;
///
/// enum Message {
///     Saved(bool),
/// }
///
/// let cmd = Command::perform(async { true }, Message::Saved);
/// ```
pub struct Command<Msg: Send + 'static> {
    pub(crate) stream: Option<BoxStream<'static, Msg>>,
}

impl<Msg: Send + 'static> Command<Msg> {
    /// Create a command that does nothing.
    ///
    /// # Examples
    ///
    /// ```
    /// use govai_query::command::Command;
    ///
    /// let cmd: Command<i32> = Command::none();
    /// assert!(cmd.is_none());
    /// ```
    #[must_use]
    pub fn none() -> Self {
        Self { stream: None }
    }

    /// Perform an asynchronous operation and convert its result to a message.
    ///
    /// # Examples
    ///
    /// ```
    /// use govai_query::command::Command;
    ///
    /// async fn stale_count() -> u64 {
    ///     3
    /// }
    ///
    /// enum Message {
    ///     StaleCount(u64),
    /// }
    ///
    /// let cmd = Command::perform(stale_count(), Message::StaleCount);
    /// ```
    pub fn perform<A>(
        future: impl Future<Output = A> + Send + 'static,
        f: impl FnOnce(A) -> Msg + Send + 'static,
    ) -> Self {
        Self::future(future.map(f))
    }

    /// Create a command from a future that produces a message.
    pub fn future(future: impl Future<Output = Msg> + Send + 'static) -> Self {
        Self {
            stream: Some(future.into_stream().boxed()),
        }
    }

    /// Batch multiple commands into a single command.
    ///
    /// All commands run concurrently and message order is not guaranteed.
    /// `Command::none()` entries are dropped.
    pub fn batch(commands: impl IntoIterator<Item = Self>) -> Self {
        let streams: Vec<_> = commands.into_iter().filter_map(|cmd| cmd.stream).collect();

        if streams.is_empty() {
            Self::none()
        } else {
            Self {
                stream: Some(select_all(streams).boxed()),
            }
        }
    }

    /// Create a command from a stream of messages.
    pub fn stream(stream: impl Stream<Item = Msg> + Send + 'static) -> Self {
        Self {
            stream: Some(stream.boxed()),
        }
    }

    /// Transform every message this command produces.
    pub fn map<B: Send + 'static>(self, f: impl Fn(Msg) -> B + Send + 'static) -> Command<B> {
        Command {
            stream: self.stream.map(|stream| stream.map(f).boxed()),
        }
    }

    /// Returns `true` if the command performs no work.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.stream.is_none()
    }

    /// Consumes the command, returning the stream of messages it produces.
    ///
    /// `Command::none()` yields an empty stream.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Msg> {
        self.stream
            .unwrap_or_else(|| futures::stream::empty().boxed())
    }
}
