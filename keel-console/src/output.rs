//! 命令输出
//!
//! 命令通过注入的 `Output` 写标准输出和标准错误，测试中可以替换为内存缓冲区。

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

type Sink = Mutex<Box<dyn Write + Send>>;

/// 命令输出
pub struct Output {
    out: Sink,
    err: Sink,
}

impl Output {
    /// 写到进程的 stdout / stderr
    pub fn stdio() -> Self {
        Self {
            out: Mutex::new(Box::new(io::stdout())),
            err: Mutex::new(Box::new(io::stderr())),
        }
    }

    /// 写到内存缓冲区，返回读取端
    pub fn captured() -> (Self, CapturedOutput) {
        let captured = CapturedOutput::default();
        let output = Self {
            out: Mutex::new(Box::new(SharedBuffer(Arc::clone(&captured.out)))),
            err: Mutex::new(Box::new(SharedBuffer(Arc::clone(&captured.err)))),
        };
        (output, captured)
    }

    pub fn write(&self, text: &str) {
        Self::emit(&self.out, text, false);
    }

    pub fn writeln(&self, text: &str) {
        Self::emit(&self.out, text, true);
    }

    pub fn info(&self, text: &str) {
        Self::emit(&self.out, text, true);
    }

    /// 写一行到标准错误
    pub fn error(&self, text: &str) {
        Self::emit(&self.err, text, true);
    }

    fn emit(sink: &Sink, text: &str, newline: bool) {
        let mut sink = sink.lock();
        let result = if newline {
            writeln!(sink, "{}", text)
        } else {
            write!(sink, "{}", text)
        };
        if let Err(e) = result.and_then(|_| sink.flush()) {
            tracing::debug!("Failed to write console output: {}", e);
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output").finish_non_exhaustive()
    }
}

/// 内存输出的读取端
#[derive(Clone, Default)]
pub struct CapturedOutput {
    out: Arc<Mutex<Vec<u8>>>,
    err: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.out.lock()).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.err.lock()).into_owned()
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_streams_are_separate() {
        let (output, captured) = Output::captured();
        output.write("a");
        output.writeln("b");
        output.error("boom");

        assert_eq!(captured.stdout(), "ab\n");
        assert_eq!(captured.stderr(), "boom\n");
    }
}
