//! Permission mode bits and their textual forms.
//!
//! Three textual encodings are understood:
//!
//! - simple symbolic: `rwxr-x---` (9 chars) or `rwx` (3 chars), with
//!   `s`/`S` in the execute slots for setuid/setgid and `t`/`T` for sticky
//! - unix symbolic: `u+rw-x,g=rx,o-w,a+x`
//! - long symbolic: `user=+read,-write,group=+execute,other=-read`

use crate::error::{DbError, Result};

/// Read bit within one permission triple.
pub const READ: u32 = 0o4;
/// Write bit within one permission triple.
pub const WRITE: u32 = 0o2;
/// Execute bit within one permission triple.
pub const EXECUTE: u32 = 0o1;

/// Set-user-id bit.
pub const SET_UID: u32 = 0o4000;
/// Set-group-id bit.
pub const SET_GID: u32 = 0o2000;
/// Sticky bit.
pub const STICKY: u32 = 0o1000;

/// Mask covering owner/group/other triples.
pub const ACCESS_MASK: u32 = 0o777;
/// Mask covering triples plus the special bits.
pub const MODE_MASK: u32 = 0o7777;

const USER_SHIFT: u32 = 6;
const GROUP_SHIFT: u32 = 3;
const OTHER_SHIFT: u32 = 0;

/// Renders a 3-bit triple as `rwx`/`r-x`/etc.
pub fn triple_to_string(bits: u32) -> String {
    let mut s = String::with_capacity(3);
    s.push(if bits & READ != 0 { 'r' } else { '-' });
    s.push(if bits & WRITE != 0 { 'w' } else { '-' });
    s.push(if bits & EXECUTE != 0 { 'x' } else { '-' });
    s
}

/// Parses a 3-character `rwx` triple into bits.
pub fn triple_from_str(s: &str) -> Result<u32> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() != 3 {
        return Err(DbError::Syntax(format!(
            "mode triple {:?} must have exactly 3 characters",
            s
        )));
    }
    let mut bits = 0;
    for (i, (c, (flag, bit))) in chars
        .iter()
        .zip([('r', READ), ('w', WRITE), ('x', EXECUTE)])
        .enumerate()
    {
        match *c {
            ch if ch == flag => bits |= bit,
            '-' => {}
            other => {
                return Err(DbError::Syntax(format!(
                    "unexpected character {:?} at position {} of mode triple {:?}",
                    other, i, s
                )))
            }
        }
    }
    Ok(bits)
}

/// Renders a full mode as its 9-character simple symbolic form.
pub fn mode_to_simple_symbolic(mode: u32) -> String {
    let mut chars: Vec<char> = [USER_SHIFT, GROUP_SHIFT, OTHER_SHIFT]
        .iter()
        .flat_map(|shift| triple_to_string((mode >> shift) & 0o7).chars().collect::<Vec<_>>())
        .collect();

    let specials = [(SET_UID, 2, 's', 'S'), (SET_GID, 5, 's', 'S'), (STICKY, 8, 't', 'T')];
    for (bit, pos, with_exec, without_exec) in specials {
        if mode & bit != 0 {
            chars[pos] = if chars[pos] == 'x' { with_exec } else { without_exec };
        }
    }
    chars.into_iter().collect()
}

/// Parses a 3- or 9-character simple symbolic mode.
///
/// A 3-character form carries no special bits and applies to the owner
/// triple only.
pub fn simple_symbolic_to_mode(s: &str) -> Result<u32> {
    let chars: Vec<char> = s.chars().collect();
    match chars.len() {
        3 => Ok(triple_from_str(s)? << USER_SHIFT),
        9 => {
            let mut mode = 0;
            for (i, c) in chars.iter().enumerate() {
                let shift = match i / 3 {
                    0 => USER_SHIFT,
                    1 => GROUP_SHIFT,
                    _ => OTHER_SHIFT,
                };
                let (flag, bit) = match i % 3 {
                    0 => ('r', READ),
                    1 => ('w', WRITE),
                    _ => ('x', EXECUTE),
                };
                let special = match i {
                    2 => Some((SET_UID, 's', 'S')),
                    5 => Some((SET_GID, 's', 'S')),
                    8 => Some((STICKY, 't', 'T')),
                    _ => None,
                };
                match (*c, special) {
                    (ch, _) if ch == flag => mode |= bit << shift,
                    ('-', _) => {}
                    (ch, Some((sbit, with_exec, _))) if ch == with_exec => {
                        mode |= sbit | (bit << shift)
                    }
                    (ch, Some((sbit, _, without_exec))) if ch == without_exec => mode |= sbit,
                    (other, _) => {
                        return Err(DbError::Syntax(format!(
                            "unexpected character {:?} at position {} of mode {:?}",
                            other, i, s
                        )))
                    }
                }
            }
            Ok(mode)
        }
        _ => Err(DbError::Syntax(format!(
            "mode {:?} must have 3 or 9 characters",
            s
        ))),
    }
}

/// Converts a simple symbolic mode to its octal string: `"0"` for an
/// empty mode, otherwise `"0"` followed by the octal digits.
pub fn mode_to_octal(s: &str) -> Result<String> {
    let mode = simple_symbolic_to_mode(s)?;
    if mode == 0 {
        Ok("0".to_string())
    } else {
        Ok(format!("0{:o}", mode))
    }
}

/// Converts an octal string such as `"0755"` to its 9-character form.
pub fn octal_to_mode(octal: &str) -> Result<String> {
    let digits = octal.trim();
    if digits.is_empty() || !digits.chars().all(|c| ('0'..='7').contains(&c)) {
        return Err(DbError::Syntax(format!("invalid octal mode {:?}", octal)));
    }
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|e| DbError::Syntax(format!("invalid octal mode {:?}: {}", octal, e)))?;
    if mode > MODE_MASK {
        return Err(DbError::Syntax(format!(
            "octal mode {:?} exceeds {:o}",
            octal, MODE_MASK
        )));
    }
    Ok(mode_to_simple_symbolic(mode))
}

#[derive(Clone, Copy)]
enum Who {
    User,
    Group,
    Other,
}

impl Who {
    fn shift(self) -> u32 {
        match self {
            Who::User => USER_SHIFT,
            Who::Group => GROUP_SHIFT,
            Who::Other => OTHER_SHIFT,
        }
    }
}

fn apply_op(mode: u32, who: &[Who], op: char, perms: u32, specials: u32) -> u32 {
    let mut mask = 0;
    for w in who {
        mask |= perms << w.shift();
    }
    mask |= specials;
    match op {
        '+' => mode | mask,
        '-' => mode & !mask,
        _ => {
            let mut cleared = mode;
            for w in who {
                cleared &= !(0o7 << w.shift());
                cleared &= !match w {
                    Who::User => SET_UID,
                    Who::Group => SET_GID,
                    Who::Other => STICKY,
                };
            }
            cleared | mask
        }
    }
}

/// Applies a unix symbolic mode string such as `u+rw-x,g=rx,a-w` to `current`.
pub fn apply_unix_symbolic(current: u32, s: &str) -> Result<u32> {
    let mut mode = current;
    for clause in s.split(',') {
        let clause = clause.trim();
        let op_start = clause
            .find(|c| c == '+' || c == '-' || c == '=')
            .ok_or_else(|| DbError::Syntax(format!("missing operator in mode clause {:?}", clause)))?;

        let mut who = Vec::new();
        for c in clause[..op_start].chars() {
            match c {
                'u' => who.push(Who::User),
                'g' => who.push(Who::Group),
                'o' => who.push(Who::Other),
                'a' => who.extend([Who::User, Who::Group, Who::Other]),
                other => {
                    return Err(DbError::Syntax(format!(
                        "unexpected target {:?} in mode clause {:?}",
                        other, clause
                    )))
                }
            }
        }
        if who.is_empty() {
            who.extend([Who::User, Who::Group, Who::Other]);
        }

        let mut rest = clause[op_start..].chars().peekable();
        while let Some(op) = rest.next() {
            if !matches!(op, '+' | '-' | '=') {
                return Err(DbError::Syntax(format!(
                    "expected operator, found {:?} in mode clause {:?}",
                    op, clause
                )));
            }
            let mut perms = 0;
            let mut specials = 0;
            while let Some(&c) = rest.peek() {
                match c {
                    'r' => perms |= READ,
                    'w' => perms |= WRITE,
                    'x' => perms |= EXECUTE,
                    's' => {
                        for w in &who {
                            match w {
                                Who::User => specials |= SET_UID,
                                Who::Group => specials |= SET_GID,
                                Who::Other => {}
                            }
                        }
                    }
                    't' => specials |= STICKY,
                    '+' | '-' | '=' => break,
                    other => {
                        return Err(DbError::Syntax(format!(
                            "unexpected permission {:?} in mode clause {:?}",
                            other, clause
                        )))
                    }
                }
                rest.next();
            }
            mode = apply_op(mode, &who, op, perms, specials);
        }
    }
    Ok(mode & MODE_MASK)
}

/// Applies a long symbolic mode string such as
/// `user=+read,+write,-execute,group=+execute` to `current`.
pub fn apply_long_symbolic(current: u32, s: &str) -> Result<u32> {
    let mut mode = current;
    let mut target: Option<Who> = None;
    for item in s.split(',') {
        let item = item.trim();
        let change = match item.split_once('=') {
            Some((who, change)) => {
                target = Some(match who {
                    "user" => Who::User,
                    "group" => Who::Group,
                    "other" => Who::Other,
                    other => {
                        return Err(DbError::Syntax(format!(
                            "unknown mode target {:?} in {:?}",
                            other, s
                        )))
                    }
                });
                change
            }
            None => item,
        };
        let who = target.ok_or_else(|| {
            DbError::Syntax(format!("mode change {:?} precedes any target in {:?}", item, s))
        })?;

        let mut chars = change.chars();
        let op = chars.next();
        let bit = match chars.as_str() {
            "read" => READ,
            "write" => WRITE,
            "execute" => EXECUTE,
            other => {
                return Err(DbError::Syntax(format!(
                    "unknown permission {:?} in {:?}",
                    other, s
                )))
            }
        };
        mode = match op {
            Some('+') => mode | (bit << who.shift()),
            Some('-') => mode & !(bit << who.shift()),
            other => {
                return Err(DbError::Syntax(format!(
                    "expected '+' or '-', found {:?} in {:?}",
                    other, s
                )))
            }
        };
    }
    Ok(mode)
}

/// Parses any supported mode string, applying relative forms to `current`.
pub fn parse_mode(current: u32, s: &str) -> Result<u32> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DbError::Syntax("empty mode string".to_string()));
    }
    if s.starts_with("user=") || s.starts_with("group=") || s.starts_with("other=") {
        return apply_long_symbolic(current, s);
    }
    let looks_simple = s.chars().count() == 9
        && s
            .chars()
            .all(|c| matches!(c, 'r' | 'w' | 'x' | 's' | 'S' | 't' | 'T' | '-'));
    if looks_simple {
        return simple_symbolic_to_mode(s);
    }
    apply_unix_symbolic(current, s)
}
