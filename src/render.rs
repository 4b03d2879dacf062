//! XML rendering of query matches.
//!
//! Produces the document served by the image search gateway:
//!
//! ```text
//! <?xml version='1.0' encoding='UTF-8'?>
//! <matches threshold='60'>
//!   <match id='1' service='iibooru' sim='95.500000' width='640' height='480'><image id='1'/></match>
//! </matches>
//! ```
use std::io::{self, Write};

use crate::protocol::QueryResult;

/// Matches of one query together with the gateway metadata rendered around them.
#[derive(Debug, Clone)]
pub struct MatchDocument<'a> {
    pub service: &'a str,
    pub threshold: &'a str,
    pub matches: &'a [QueryResult],
}

impl MatchDocument<'_> {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let service = escape(self.service);
        let threshold = escape(self.threshold);

        writeln!(writer, "<?xml version='1.0' encoding='UTF-8'?>")?;
        writeln!(writer, "<matches threshold='{threshold}'>")?;
        for m in self.matches {
            writeln!(
                writer,
                "  <match id='{id}' service='{service}' sim='{sim:.6}' width='{w}' height='{h}'><image id='{id}'/></match>",
                id = m.img_id,
                sim = m.score,
                w = m.width,
                h = m.height,
            )?;
        }
        write!(writer, "</matches>")
    }

    pub fn render(&self) -> String {
        let mut out = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// Escape a value for use inside a single or double quoted attribute.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
