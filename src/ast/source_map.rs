/// Byte offset to line/column translation for diagnostics.
pub struct SourceMap {
    /// Offset of the first byte of every line; always starts with 0.
    newlines: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let newlines = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        SourceMap { newlines }
    }

    /// 1-based (line, column) of `offset`.
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let idx = self.newlines.partition_point(|&start| start <= offset).max(1) - 1;
        (idx + 1, offset - self.newlines[idx] + 1)
    }

    /// Text of the 1-based `line`, without its terminator. Empty when out of range.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.newlines.get(i)) else {
            return "";
        };
        let end = self.newlines.get(line).copied().unwrap_or(source.len());
        source[start..end].trim_end_matches(['\n', '\r'])
    }

    pub fn line_count(&self) -> usize {
        self.newlines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "func main() {\n    var x = 1\n    return x\n}";

    #[test]
    fn first_line_positions() {
        let map = SourceMap::new(SRC);
        assert_eq!(map.lookup(0), (1, 1));
        assert_eq!(map.lookup(5), (1, 6));
    }

    #[test]
    fn later_lines() {
        let map = SourceMap::new(SRC);
        // 'v' of "var" is 4 spaces into line 2
        let var_at = SRC.find("var").unwrap();
        assert_eq!(map.lookup(var_at), (2, 5));
        let ret_at = SRC.find("return").unwrap();
        assert_eq!(map.lookup(ret_at), (3, 5));
    }

    #[test]
    fn newline_belongs_to_its_line() {
        let map = SourceMap::new("ab\ncd");
        assert_eq!(map.lookup(2), (1, 3));
        assert_eq!(map.lookup(3), (2, 1));
    }

    #[test]
    fn line_text_lookup() {
        let map = SourceMap::new(SRC);
        assert_eq!(map.line_text(SRC, 1), "func main() {");
        assert_eq!(map.line_text(SRC, 3), "    return x");
        assert_eq!(map.line_text(SRC, 4), "}");
        assert_eq!(map.line_count(), 4);
    }

    #[test]
    fn line_text_out_of_range() {
        let map = SourceMap::new(SRC);
        assert_eq!(map.line_text(SRC, 0), "");
        assert_eq!(map.line_text(SRC, 42), "");
    }

    #[test]
    fn crlf_is_trimmed() {
        let src = "one\r\ntwo";
        let map = SourceMap::new(src);
        assert_eq!(map.line_text(src, 1), "one");
        assert_eq!(map.line_text(src, 2), "two");
    }

    #[test]
    fn empty_source() {
        let map = SourceMap::new("");
        assert_eq!(map.lookup(0), (1, 1));
        assert_eq!(map.line_text("", 1), "");
    }
}
