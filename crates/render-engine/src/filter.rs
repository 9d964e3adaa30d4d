//! Typed encoder filter graphs.
//!
//! Graphs are built from [`Filter`] nodes grouped into labelled
//! [`FilterChain`]s and serialized to the encoder's textual syntax only at
//! the edge, when an argument list or a filter script is written.

use std::fmt;

/// A single filter with its `key=value` (or positional) options.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    name: String,
    args: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append a `key=value` option.
    pub fn arg(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.args.push(format!("{key}={value}"));
        self
    }

    /// Append a positional option.
    pub fn positional(mut self, value: impl fmt::Display) -> Self {
        self.args.push(value.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.args.is_empty() {
            write!(f, "={}", self.args.join(":"))?;
        }
        Ok(())
    }
}

/// Linear chain of filters between input and output pads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterChain {
    inputs: Vec<String>,
    filters: Vec<Filter>,
    outputs: Vec<String>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, label: impl Into<String>) -> Self {
        self.inputs.push(label.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Append `filter` only when `cond` holds.
    pub fn filter_if(self, cond: bool, filter: impl FnOnce() -> Filter) -> Self {
        if cond {
            self.filter(filter())
        } else {
            self
        }
    }

    pub fn output(mut self, label: impl Into<String>) -> Self {
        self.outputs.push(label.into());
        self
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.inputs {
            write!(f, "[{label}]")?;
        }
        for (idx, filter) in self.filters.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{filter}")?;
        }
        for label in &self.outputs {
            write!(f, "[{label}]")?;
        }
        Ok(())
    }
}

/// A complete graph: chains joined with `;`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterGraph {
    chains: Vec<FilterChain>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chain: FilterChain) {
        self.chains.push(chain);
    }

    pub fn chains(&self) -> &[FilterChain] {
        &self.chains
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Serialized graph text.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, chain) in self.chains.iter().enumerate() {
            if idx > 0 {
                f.write_str(";")?;
            }
            write!(f, "{chain}")?;
        }
        Ok(())
    }
}
