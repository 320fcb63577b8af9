use crate::sequence::{Empty, Sequence};
use crate::stream::{Cleanup, ResultStream};
use crate::types::{Header, Meta, Row};

/// Assembles a [`ResultStream`] from its parts
///
/// ```rust
/// use sluice_query::{next_single, Meta, ResultStreamBuilder, Value};
///
/// let mut stream = ResultStreamBuilder::new()
///     .with_sequence(next_single(vec![Value::from("ok")]))
///     .with_header(vec!["Reply".to_string()])
///     .with_meta(Meta::schema_less())
///     .build();
///
/// assert_eq!(stream.next().unwrap()[0].as_str(), Some("ok"));
/// assert!(!stream.has_next());
/// ```
pub struct ResultStreamBuilder {
    sequence: Box<dyn Sequence<Row>>,
    header: Header,
    meta: Meta,
    cleanup: Option<Cleanup>,
}

impl ResultStreamBuilder {
    pub fn new() -> Self {
        Self {
            sequence: Box::new(Empty),
            header: Vec::new(),
            meta: Meta::default(),
            cleanup: None,
        }
    }

    pub fn with_sequence(mut self, sequence: impl Sequence<Row> + 'static) -> Self {
        self.sequence = Box::new(sequence);
        self
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Action run exactly once when the stream is closed, exhausted, failed or dropped
    pub fn with_cleanup(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    pub fn build(self) -> ResultStream {
        ResultStream::new(self.sequence, self.header, self.meta, self.cleanup)
    }
}

impl Default for ResultStreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}
