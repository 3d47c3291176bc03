use super::traits::EngineInput;
use crate::core::models::element::Element;
use crate::core::models::line::{Line, LineItem};
use std::io::{self, Write};

/// Name of the engine's program input file inside a run directory.
pub const INPUT_FILE_NAME: &str = "zgoubi.dat";

/// Renders a line as engine input text.
///
/// Each element is followed by a newline; sub-lines are rendered in place. The line's
/// name is emitted as a leading title line only for a full line, since the engine
/// reads the first line of a program as its title.
pub fn render_line(line: &Line) -> String {
    let mut out = String::new();
    if line.is_full_line() {
        out.push_str(line.name());
        out.push('\n');
    }
    for item in line.items() {
        match item {
            LineItem::Element(element) => {
                out.push_str(&element.render());
                out.push('\n');
            }
            LineItem::Line(sub) => out.push_str(&render_line(sub)),
        }
    }
    out
}

/// `true` for a line opening an element block, such as `'QUADRUPO' q1`.
fn is_keyword_line(line: &str) -> bool {
    let Some(rest) = line.trim_start().strip_prefix('\'') else {
        return false;
    };
    let keyword = rest.split('\'').next().unwrap_or_default();
    !keyword.is_empty()
        && rest.len() > keyword.len()
        && keyword
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Splits ready-made engine input into a line of raw elements, one per keyword block.
///
/// A first line that does not open a block is the program title and names the line;
/// otherwise the line is called `fallback_name`. Rendering the result reproduces the
/// program up to blank lines.
pub fn parse_program(text: &str, fallback_name: &str) -> Line {
    let mut lines = text.lines().peekable();
    let mut name = fallback_name.to_string();
    if let Some(first) = lines.peek() {
        if !is_keyword_line(first) {
            if !first.trim().is_empty() {
                name = first.trim().to_string();
            }
            lines.next();
        }
    }

    let mut line = Line::new(name);
    let mut block = String::new();
    for text_line in lines {
        let opens_block = is_keyword_line(text_line);
        if opens_block && !block.is_empty() {
            line.push(Element::raw(std::mem::take(&mut block)));
        }
        if block.is_empty() && !opens_block && text_line.trim().is_empty() {
            continue;
        }
        block.push_str(text_line);
        block.push('\n');
    }
    if !block.is_empty() {
        line.push(Element::raw(block));
    }
    line
}

impl EngineInput for Line {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(render_line(self).as_bytes())
    }
}
