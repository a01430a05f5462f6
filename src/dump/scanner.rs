use tracing::warn;

use crate::error::LoadError;
use crate::io::DumpSource;

/// One complete statement cut out of the dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedStatement {
    /// Byte offset of the statement's first significant character
    pub offset: u64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comment {
    None,
    Line,
    Block,
}

/// Lexical state carried across chunk boundaries
#[derive(Debug, Clone, Copy)]
struct ScanState {
    quote: Option<u8>,
    escape_next: bool,
    depth: u32,
    comment: Comment,
    /// Buffer index where the current comment began, when it sits inside a statement
    comment_start: Option<usize>,
    /// Buffer index of the first byte that is neither whitespace nor comment
    content_start: Option<usize>,
}

impl ScanState {
    fn new() -> Self {
        Self {
            quote: None,
            escape_next: false,
            depth: 0,
            comment: Comment::None,
            comment_start: None,
            content_start: None,
        }
    }

    fn is_open(&self) -> bool {
        self.quote.is_some() || self.depth > 0 || self.comment == Comment::Block
    }
}

enum Scan {
    /// Statement ends right before this buffer index
    Complete(usize),
    NeedMore,
}

/// Splits a dump into statements without materializing it
///
/// Statements end at `;` outside quotes, comments and parentheses. Input is
/// pulled from the source one chunk at a time; a statement longer than
/// `max_statement_bytes` fails and the rest of it is discarded. Plain `--` and
/// `/* */` comments inside a statement are replaced by a single space; MySQL
/// conditional comments (`/*!...*/`) are kept.
pub struct StatementScanner {
    source: DumpSource,
    buffer: Vec<u8>,
    /// Absolute offset of `buffer[0]`
    buffer_offset: u64,
    /// Start of the statement currently being scanned
    start: usize,
    scan_pos: usize,
    state: ScanState,
    /// Buffer ranges of comments inside the current statement
    comments: Vec<(usize, usize)>,
    backslash_escapes: bool,
    max_statement_bytes: usize,
    discarding: bool,
    eof: bool,
    finished: bool,
}

impl StatementScanner {
    pub fn new(source: DumpSource, backslash_escapes: bool, max_statement_bytes: usize) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            buffer_offset: 0,
            start: 0,
            scan_pos: 0,
            state: ScanState::new(),
            comments: Vec::new(),
            backslash_escapes,
            max_statement_bytes,
            discarding: false,
            eof: false,
            finished: false,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.source.bytes_read()
    }

    pub fn size_hint(&self) -> Option<u64> {
        self.source.size_hint()
    }

    /// Next statement, or `None` once the source is exhausted
    pub async fn next_statement(&mut self) -> Result<Option<ScannedStatement>, LoadError> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if let Scan::Complete(end) = self.scan() {
                let content_start = self.state.content_start;
                let comments = std::mem::take(&mut self.comments);
                let was_discarding = self.discarding;
                self.start = end;
                self.scan_pos = end;
                self.state = ScanState::new();
                self.discarding = false;

                if was_discarding {
                    continue;
                }
                match content_start {
                    Some(from) if !is_bare_terminator(&self.buffer[from..end]) => {
                        return self.emit(from, end, &comments).map(Some);
                    }
                    _ => continue,
                }
            }

            if self.eof {
                return self.finish();
            }

            self.compact();
            let pending = self.buffer.len();
            if !self.discarding && pending > self.max_statement_bytes {
                let offset = self.statement_offset();
                self.discarding = true;
                self.comments.clear();
                warn!(offset, "statement exceeds {} bytes", self.max_statement_bytes);
                return Err(LoadError::malformed(
                    offset,
                    format!(
                        "statement exceeds the maximum size of {} bytes",
                        self.max_statement_bytes
                    ),
                ));
            }

            if self.source.read_chunk(&mut self.buffer).await? == 0 {
                self.eof = true;
            }
        }
    }

    /// Handle whatever is left once the source reports end of input
    fn finish(&mut self) -> Result<Option<ScannedStatement>, LoadError> {
        self.finished = true;
        if self.discarding {
            return Ok(None);
        }
        let Some(from) = self.state.content_start else {
            return Ok(None);
        };
        if self.state.is_open() {
            let reason = if self.state.quote.is_some() {
                "unterminated quoted string at end of input"
            } else if self.state.depth > 0 {
                "unbalanced parenthesis at end of input"
            } else {
                "unterminated comment at end of input"
            };
            return Err(LoadError::malformed(self.statement_offset(), reason));
        }
        let end = self.buffer.len();
        // A line comment may run up to the end of input
        if let (Comment::Line, Some(comment_start)) = (self.state.comment, self.state.comment_start) {
            self.comments.push((comment_start, end));
        }
        let comments = std::mem::take(&mut self.comments);
        self.emit(from, end, &comments).map(Some)
    }

    fn emit(
        &self,
        from: usize,
        end: usize,
        comments: &[(usize, usize)],
    ) -> Result<ScannedStatement, LoadError> {
        let offset = self.buffer_offset + from as u64;
        let encoding = self.source.encoding();
        if comments.is_empty() {
            let text = encoding.decode(&self.buffer[from..end], offset)?;
            return Ok(ScannedStatement { offset, text });
        }

        let mut kept = Vec::with_capacity(end - from);
        let mut at = from;
        for &(comment_start, comment_end) in comments {
            kept.extend_from_slice(&self.buffer[at..comment_start]);
            kept.push(b' ');
            at = comment_end;
        }
        kept.extend_from_slice(&self.buffer[at..end]);
        let text = encoding.decode(&kept, offset)?;
        Ok(ScannedStatement { offset, text })
    }

    fn statement_offset(&self) -> u64 {
        self.buffer_offset + self.state.content_start.unwrap_or(self.start) as u64
    }

    /// Drop bytes that belong to already emitted (or discarded) statements
    fn compact(&mut self) {
        let consumed = if self.discarding {
            self.scan_pos
        } else {
            self.start
        };
        if consumed == 0 {
            return;
        }
        self.buffer.drain(..consumed);
        self.buffer_offset += consumed as u64;
        self.scan_pos -= consumed;
        self.start = self.start.saturating_sub(consumed);
        self.state.content_start = self
            .state
            .content_start
            .and_then(|i| i.checked_sub(consumed));
        self.state.comment_start = self
            .state
            .comment_start
            .and_then(|i| i.checked_sub(consumed));
        if self.discarding {
            self.comments.clear();
        }
        for (comment_start, comment_end) in &mut self.comments {
            *comment_start -= consumed;
            *comment_end -= consumed;
        }
    }

    /// Advance the lexical state over buffered bytes
    fn scan(&mut self) -> Scan {
        let buf = &self.buffer;
        let st = &mut self.state;
        let mut i = self.scan_pos;

        while i < buf.len() {
            let b = buf[i];
            let next = buf.get(i + 1).copied();
            // Two-byte tokens may straddle a chunk boundary
            let lookahead_missing = next.is_none() && !self.eof;

            match st.comment {
                Comment::Line => {
                    if b == b'\n' {
                        st.comment = Comment::None;
                        if let Some(comment_start) = st.comment_start.take() {
                            self.comments.push((comment_start, i));
                        }
                    }
                    i += 1;
                    continue;
                }
                Comment::Block => {
                    if b == b'*' {
                        if lookahead_missing {
                            break;
                        }
                        if next == Some(b'/') {
                            st.comment = Comment::None;
                            if let Some(comment_start) = st.comment_start.take() {
                                self.comments.push((comment_start, i + 2));
                            }
                            i += 2;
                            continue;
                        }
                    }
                    i += 1;
                    continue;
                }
                Comment::None => {}
            }

            if let Some(q) = st.quote {
                if st.escape_next {
                    st.escape_next = false;
                } else if b == b'\\' && self.backslash_escapes && q != b'`' {
                    st.escape_next = true;
                } else if b == q {
                    st.quote = None;
                }
                i += 1;
                continue;
            }

            if b.is_ascii_whitespace() {
                i += 1;
                continue;
            }

            match b {
                b'-' | b'/' if lookahead_missing => break,
                b'-' if next == Some(b'-') => {
                    st.comment = Comment::Line;
                    st.comment_start = st.content_start.map(|_| i);
                    i += 2;
                    continue;
                }
                b'/' if next == Some(b'*') => {
                    match buf.get(i + 2) {
                        None if !self.eof => break,
                        // MySQL conditional comments carry executable statements
                        Some(b'!') => {
                            st.content_start.get_or_insert(i);
                        }
                        _ => st.comment_start = st.content_start.map(|_| i),
                    }
                    st.comment = Comment::Block;
                    i += 2;
                    continue;
                }
                b'#' if st.content_start.is_none() => {
                    st.comment = Comment::Line;
                    i += 1;
                    continue;
                }
                _ => {}
            }

            st.content_start.get_or_insert(i);
            match b {
                b'\'' | b'"' | b'`' => st.quote = Some(b),
                b'(' => st.depth += 1,
                b')' => st.depth = st.depth.saturating_sub(1),
                b';' if st.depth == 0 => {
                    self.scan_pos = i + 1;
                    return Scan::Complete(i + 1);
                }
                _ => {}
            }
            i += 1;
        }

        self.scan_pos = i;
        Scan::NeedMore
    }
}

fn is_bare_terminator(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == b';' || b.is_ascii_whitespace())
}
