//! Call-stack capture and formatting.

const MAX_DEPTH: usize = 64;

/// One resolved stack frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub function: String,
    pub file: String,
    pub line: u32,
}

/// Walks the current call stack, skipping `skip` frames beyond the capture
/// machinery itself. Depth is capped at 64 frames. Returns an empty vector
/// when nothing could be resolved.
pub fn capture_stack(skip: usize) -> Vec<Frame> {
    let mut frames = Vec::new();
    let trace = backtrace::Backtrace::new();
    for frame in trace.frames() {
        for symbol in frame.symbols() {
            let function = symbol
                .name()
                .map(|name| name.to_string())
                .unwrap_or_else(|| String::from("<unknown>"));
            frames.push(Frame {
                function,
                file: symbol
                    .filename()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default(),
                line: symbol.lineno().unwrap_or(0),
            });
        }
    }

    let internal = frames
        .iter()
        .take_while(|frame| is_internal(&frame.function))
        .count();
    frames
        .into_iter()
        .skip(internal + skip)
        .take(MAX_DEPTH)
        .collect()
}

// Innermost frames belong to the unwinder, this module, or (when invoked
// from the panic hook) the std panic machinery. They precede the first
// interesting frame and are dropped wholesale.
fn is_internal(function: &str) -> bool {
    function.starts_with("backtrace::")
        || function.contains("stacktrace::capture_stack")
        || function.contains("panics::install_hook")
        || function.starts_with("std::panicking")
        || function.starts_with("core::panicking")
        || function.starts_with("rust_begin_unwind")
        || function.starts_with("std::sys::backtrace")
        || function.starts_with("std::sys_common::backtrace")
}

/// Renders `frames` under an `<error type>: <message>` heading.
pub fn format_error_with_stack<E: std::error::Error + ?Sized>(err: &E, frames: &[Frame]) -> String {
    format_with_stack(&format!("{}: {}", std::any::type_name::<E>(), err), frames)
}

/// Renders `frames` under a `panic: <message>` heading, for payloads
/// recovered from `catch_unwind`.
pub fn format_panic_with_stack(payload: &(dyn std::any::Any + Send), frames: &[Frame]) -> String {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<unknown payload>"
    };
    format_with_stack(&format!("panic: {message}"), frames)
}

fn format_with_stack(heading: &str, frames: &[Frame]) -> String {
    let mut out = String::new();
    out.push_str(heading);
    out.push('\n');
    for frame in frames.iter().take(MAX_DEPTH) {
        out.push_str(&short_name(&frame.function));
        out.push_str("()\n");
        out.push_str(&format!("    {}:{}\n", frame.file, frame.line));
    }
    out
}

/// Shortens a fully-qualified function name: the `::h<hex>` symbol hash
/// goes first, then leading path segments before the last `/`, then the
/// package prefix before the first `.`.
fn short_name(function: &str) -> String {
    let mut name = function;
    if let Some(idx) = name.rfind("::h") {
        let hash = &name[idx + 3..];
        if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
            name = &name[..idx];
        }
    }
    if let Some(idx) = name.rfind('/') {
        name = &name[idx + 1..];
    }
    if let Some(idx) = name.find('.') {
        name = &name[idx + 1..];
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::{capture_stack, format_error_with_stack, format_with_stack, short_name, Frame};

    #[test]
    fn shortens_method_receivers() {
        assert_eq!(short_name("pkg.path/sub.(*T).Method"), "(*T).Method");
        assert_eq!(short_name("main.handler"), "handler");
    }

    #[test]
    fn strips_symbol_hashes_but_keeps_module_paths() {
        assert_eq!(
            short_name("collector::router::run::h0123456789abcdef"),
            "collector::router::run"
        );
        // not a hash suffix, leave it alone
        assert_eq!(short_name("collector::run::hello"), "collector::run::hello");
    }

    #[test]
    fn formats_two_lines_per_frame() {
        let frames = [Frame {
            function: "pkg.path/sub.(*T).Method".to_string(),
            file: "file.ext".to_string(),
            line: 42,
        }];

        let formatted = format_with_stack("heading", &frames);
        assert_eq!(formatted, "heading\n(*T).Method()\n    file.ext:42\n");
    }

    #[test]
    fn zero_frames_leave_the_error_line_alone() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "broken pipe");
        let formatted = format_error_with_stack(&err, &[]);

        assert_eq!(formatted, "std::io::Error: broken pipe\n");
    }

    #[test]
    fn captured_stacks_exclude_the_capture_machinery() {
        let frames = capture_stack(0);

        assert!(!frames.is_empty());
        assert!(frames
            .iter()
            .all(|frame| !frame.function.contains("capture_stack")));
    }
}
