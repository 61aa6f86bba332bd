//! `-filter_complex` argument building blocks.
//!
//! Generic, reusable vocabulary for composing libavfilter expressions. The
//! filters themselves are described at <https://ffmpeg.org/ffmpeg-filters.html>.

use std::fmt;

/// A node in a filter chain: either a single libavfilter expression or a
/// sub-chain that flattens into its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterNode {
    /// One filter expression, e.g. `"hqdn3d"` or `"scale=w=iw/2:h=ih/2"`.
    Leaf(String),
    /// Filters piped together; rendered comma-separated.
    Chain(Vec<FilterNode>),
}

impl Default for FilterNode {
    fn default() -> Self {
        FilterNode::Chain(Vec::new())
    }
}

impl FilterNode {
    fn render(&self, out: &mut String) {
        match self {
            FilterNode::Leaf(f) => out.push_str(f),
            FilterNode::Chain(nodes) => {
                for (i, n) in nodes.iter().enumerate() {
                    if i != 0 {
                        out.push(',');
                    }
                    n.render(out);
                }
            }
        }
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out);
        f.write_str(&out)
    }
}

impl From<&str> for FilterNode {
    fn from(f: &str) -> Self {
        FilterNode::Leaf(f.to_string())
    }
}

impl From<String> for FilterNode {
    fn from(f: String) -> Self {
        FilterNode::Leaf(f)
    }
}

/// Builds a [`FilterNode::Chain`] from a heterogeneous list of filters and
/// preexisting chains. Plain strings are accepted so that a constant does not
/// have to be declared for every single filter (there's a lot!).
macro_rules! chain {
    ($($f:expr),+ $(,)?) => {
        $crate::filter::FilterNode::Chain(vec![$($f.into()),+])
    };
}
pub(crate) use chain;

/// A stream takes optional input pads, passes them through a chain of filters
/// and sinks into optional output pads.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    /// Input pads like `"[0:v]"`.
    pub sources: Vec<String>,
    pub chain: FilterNode,
    /// Output pads like `"[out]"`.
    pub sinks: Vec<String>,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.sources {
            f.write_str(s)?;
        }
        write!(f, "{}", self.chain)?;
        for s in &self.sinks {
            f.write_str(s)?;
        }
        Ok(())
    }
}

/// A series of streams, rendered semicolon-separated for `-filter_complex`.
#[derive(Debug, Clone, Default)]
pub struct FilterGraph(pub Vec<Stream>);

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(";")?;
            }
            write!(f, "{s}")?;
        }
        Ok(())
    }
}
