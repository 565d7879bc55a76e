//! Indentation-aware line buffer used by both backends.

use crate::error::GenerateError;

const INDENT_ONE: &str = "    ";

/// Appends lines at the current indentation depth.
///
/// Writing to a `String` cannot fail, so unlike `fmt::Write` none of the
/// methods return a `Result`; they return `&mut Self` for chaining.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    out: String,
    depth: usize,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// One line at the current depth.  An empty `text` yields a bare newline
    /// with no trailing whitespace.
    pub fn line(&mut self, text: impl AsRef<str>) -> &mut Self {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.out.push_str(INDENT_ONE);
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
        self
    }

    /// Every line of a multi-line snippet, each re-indented to the current
    /// depth.  Used for caller-supplied code, which is written unindented.
    pub fn lines(&mut self, snippet: &str) -> &mut Self {
        for l in snippet.lines() {
            self.line(l.trim_end());
        }
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.out.push('\n');
        self
    }

    /// Verbatim text; no indentation is applied.
    pub fn raw(&mut self, text: &str) -> &mut Self {
        self.out.push_str(text);
        self
    }

    pub fn indent(&mut self) -> &mut Self {
        self.depth += 1;
        self
    }

    pub fn dedent(&mut self) -> &mut Self {
        self.depth = self.depth.saturating_sub(1);
        self
    }

    /// `head {` and one level deeper.  Pair with [`close`](Self::close).
    pub fn open(&mut self, head: impl AsRef<str>) -> &mut Self {
        self.line(format!("{} {{", head.as_ref()));
        self.indent()
    }

    /// `} else {`-style continuation of an open block.
    pub fn branch(&mut self, text: impl AsRef<str>) -> &mut Self {
        self.dedent();
        self.line(text);
        self.indent()
    }

    pub fn close(&mut self) -> &mut Self {
        self.dedent();
        self.line("}")
    }

    /// `head {` / body one level deeper / `}`.
    pub fn block(&mut self, head: impl AsRef<str>, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.line(format!("{} {{", head.as_ref()));
        self.indent();
        body(self);
        self.dedent();
        self.line("}")
    }

    /// [`block`](Self::block) for bodies that can fail.
    pub fn try_block(
        &mut self,
        head: impl AsRef<str>,
        body: impl FnOnce(&mut Self) -> Result<(), GenerateError>,
    ) -> Result<&mut Self, GenerateError> {
        self.line(format!("{} {{", head.as_ref()));
        self.indent();
        body(self)?;
        self.dedent();
        Ok(self.line("}"))
    }

    pub fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_blocks() {
        let mut b = CodeBuilder::new();
        b.block("static int f(lua_State *L)", |b| {
            b.block("if (x)", |b| {
                b.line("return 1;");
            });
            b.line("");
            b.line("return 0;");
        });
        assert_eq!(
            b.finish(),
            "static int f(lua_State *L) {\n    if (x) {\n        return 1;\n    }\n\n    return 0;\n}\n"
        );
    }

    #[test]
    fn snippets_are_reindented() {
        let mut b = CodeBuilder::new();
        b.indent().lines("a();\nb();\n");
        assert_eq!(b.finish(), "    a();\n    b();\n");
    }
}
