//! Standalone export: render a network as self-contained Rust source.
//!
//! The generated code has no dependency on this crate. It keeps the
//! activation (`a`) and state (`s`) arrays between calls, so recurrent
//! networks behave as they do here.

use std::fmt::Write;

use super::Network;
use crate::activation::Activation;
use crate::error::{NetworkError, Result};

/// Render an `f64` as a valid Rust expression.
fn literal(x: f64) -> String {
    if x.is_nan() {
        "f64::NAN".into()
    } else if x.is_infinite() {
        if x > 0.0 {
            "f64::INFINITY".into()
        } else {
            "f64::NEG_INFINITY".into()
        }
    } else {
        format!("{:?}", x)
    }
}

fn literal_list(values: impl Iterator<Item = f64>) -> String {
    values.map(literal).collect::<Vec<_>>().join(", ")
}

impl Network {
    /// Generate Rust source for a `StandaloneNetwork` that reproduces this
    /// network's forward pass.
    ///
    /// Each non-input node becomes two statements:
    ///
    /// ```text
    /// s[i] = a[from] * w * a[gater] + ... + s[i] * self_w * a[self_gater] + bias;
    /// a[i] = squash(s[i]) * mask;
    /// ```
    ///
    /// Gater and mask factors appear only where they apply. Only the squash
    /// functions in use are emitted.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::NoOutputs`] for a network without outputs.
    pub fn standalone(&self) -> Result<String> {
        if self.output_size() == 0 {
            return Err(NetworkError::NoOutputs);
        }

        let len = self.order.len();
        let mut used: Vec<Activation> = Vec::new();
        for &id in &self.order[self.input_size()..] {
            let squash = self.nodes[id].squash;
            if !used.contains(&squash) {
                used.push(squash);
            }
        }

        let mut src = String::new();
        for squash in &used {
            src.push_str(&squash.rust_source());
            src.push('\n');
        }

        let _ = writeln!(src, "pub struct StandaloneNetwork {{");
        let _ = writeln!(src, "    a: [f64; {}],", len);
        let _ = writeln!(src, "    s: [f64; {}],", len);
        let _ = writeln!(src, "}}\n");
        let _ = writeln!(src, "impl StandaloneNetwork {{");
        let _ = writeln!(src, "    pub fn new() -> Self {{");
        let _ = writeln!(src, "        Self {{");
        let _ = writeln!(
            src,
            "            a: [{}],",
            literal_list(self.order.iter().map(|&id| self.nodes[id].activation))
        );
        let _ = writeln!(
            src,
            "            s: [{}],",
            literal_list(self.order.iter().map(|&id| self.nodes[id].state))
        );
        let _ = writeln!(src, "        }}");
        let _ = writeln!(src, "    }}\n");
        let _ = writeln!(
            src,
            "    pub fn activate(&mut self, input: &[f64; {}]) -> [f64; {}] {{",
            self.input_size(),
            self.output_size()
        );
        let _ = writeln!(src, "        let (a, s) = (&mut self.a, &mut self.s);");

        for i in 0..self.input_size() {
            let _ = writeln!(src, "        a[{}] = input[{}];", i, i);
        }

        for pos in self.input_size()..len {
            let id = self.order[pos];
            let node = &self.nodes[id];
            let mut terms = Vec::new();

            for &c in &node.incoming {
                let conn = &self.connections[c];
                if !conn.enabled {
                    continue;
                }
                let mut term = format!("a[{}] * {}", self.positions[conn.from], literal(conn.weight));
                if let Some(g) = conn.gater {
                    let _ = write!(term, " * a[{}]", self.positions[g]);
                }
                terms.push(term);
            }

            if let Some(conn) = node
                .self_connection
                .map(|c| &self.connections[c])
                .filter(|c| c.enabled)
            {
                let mut term = format!("s[{}] * {}", pos, literal(conn.weight));
                if let Some(g) = conn.gater {
                    let _ = write!(term, " * a[{}]", self.positions[g]);
                }
                terms.push(term);
            }

            terms.push(literal(node.bias));
            let _ = writeln!(src, "        s[{}] = {};", pos, terms.join(" + "));

            let squash = node.squash.source_ident();
            if node.mask == 1.0 {
                let _ = writeln!(src, "        a[{}] = {}(s[{}]);", pos, squash, pos);
            } else {
                let _ = writeln!(
                    src,
                    "        a[{}] = {}(s[{}]) * {};",
                    pos,
                    squash,
                    pos,
                    literal(node.mask)
                );
            }
        }

        let outputs: Vec<String> = (len - self.output_size()..len)
            .map(|pos| format!("a[{}]", pos))
            .collect();
        let _ = writeln!(src, "        [{}]", outputs.join(", "));
        let _ = writeln!(src, "    }}");
        let _ = writeln!(src, "}}");

        Ok(src)
    }
}
