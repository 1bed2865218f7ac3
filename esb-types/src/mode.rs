//! Permission bits applied to the output file after a successful build.

use serde::Deserialize;

/// How to change the mode of the output file.
///
/// * `493` or `"0755"`: set the permission bits outright (numbers are taken literally,
///   strings of digits are octal).
/// * `"+x"`, `"u+x,g-w"`, `"a=r"`: chmod-style symbolic changes.
/// * A list of the above, applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FileModeSpec {
    Bits(u32),
    Expr(String),
    List(Vec<FileModeSpec>),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid file mode {spec:?}: {reason}")]
pub struct ModeError {
    pub spec: String,
    pub reason: &'static str,
}

/// Mask of the bits a mode spec is allowed to touch.
const PERMISSION_MASK: u32 = 0o7777;

impl FileModeSpec {
    /// Compute the new mode for a file whose current mode is `current`.
    pub fn resolve(&self, current: u32) -> Result<u32, ModeError> {
        match self {
            FileModeSpec::Bits(bits) => {
                if *bits > PERMISSION_MASK {
                    return Err(ModeError {
                        spec: bits.to_string(),
                        reason: "mode out of range",
                    });
                }
                Ok((current & !PERMISSION_MASK) | bits)
            }
            FileModeSpec::Expr(expr) => resolve_expr(expr, current),
            FileModeSpec::List(specs) => specs
                .iter()
                .try_fold(current, |mode, spec| spec.resolve(mode)),
        }
    }
}

fn resolve_expr(expr: &str, current: u32) -> Result<u32, ModeError> {
    let err = |reason| ModeError {
        spec: expr.to_string(),
        reason,
    };

    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(err("empty mode"));
    }
    if trimmed.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        let bits = u32::from_str_radix(trimmed, 8).map_err(|_| err("bad octal"))?;
        return FileModeSpec::Bits(bits).resolve(current);
    }

    let mut mode = current;
    for clause in trimmed.split(',') {
        let op_idx = clause
            .find(['+', '-', '='])
            .ok_or_else(|| err("missing one of '+', '-', '='"))?;
        let (who, rest) = clause.split_at(op_idx);
        let op = rest.as_bytes()[0];
        let perms = &rest[1..];

        let mut who_mask = 0;
        for c in who.chars() {
            who_mask |= match c {
                'u' => 0o700,
                'g' => 0o070,
                'o' => 0o007,
                'a' => 0o777,
                _ => return Err(err("unknown class, expected one of 'ugoa'")),
            };
        }
        if who_mask == 0 {
            who_mask = 0o777;
        }

        let mut perm_bits = 0;
        for c in perms.chars() {
            perm_bits |= match c {
                'r' => 0o444,
                'w' => 0o222,
                'x' => 0o111,
                _ => return Err(err("unknown permission, expected one of 'rwx'")),
            };
        }
        let bits = perm_bits & who_mask;

        mode = match op {
            b'+' => mode | bits,
            b'-' => mode & !bits,
            b'=' => (mode & !who_mask) | bits,
            _ => unreachable!("found by the search above"),
        };
    }
    Ok(mode)
}
