use crate::error::{DecodeFault, DecodeFaultKind};
use crate::pickle::opcodes::{ArgKind, HIGHEST_PROTOCOL, Opcode};

/// Inline operand of a decoded instruction.
///
/// Byte payloads are recorded by length only; tensor storage can be large
/// and is never interesting to the classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(usize),
    Global { module: String, name: String },
}

impl Operand {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Operand::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Operand::Int(v) => Some(*v),
            Operand::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// One decoded pickle instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Option<Operand>,
    /// Absolute byte offset of the opcode byte.
    pub offset: u64,
}

/// Lazy decoder over a pickle byte stream.
///
/// Yields instructions in stream order and ends after STOP. On malformed
/// input it yields exactly one `DecodeFault` and then ends. Decoding never
/// executes anything: container builds and calls are only recorded.
pub struct OpcodeReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> OpcodeReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::starting_at(bytes, 0)
    }

    /// Start decoding at `start`. Offsets stay relative to the whole buffer,
    /// which is how concatenated pickles keep absolute positions.
    pub fn starting_at(bytes: &'a [u8], start: usize) -> Self {
        Self {
            bytes,
            pos: start.min(bytes.len()),
            done: false,
        }
    }

    /// Offset of the next undecoded byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn fault(offset: usize, kind: DecodeFaultKind) -> DecodeFault {
        DecodeFault {
            offset: offset as u64,
            kind,
        }
    }

    fn take(&mut self, n: usize, at: usize, op: Opcode) -> Result<&'a [u8], DecodeFault> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| Self::fault(at, DecodeFaultKind::Truncated(op.name())))?;
        let bytes = self.bytes;
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, at: usize, op: Opcode) -> Result<[u8; N], DecodeFault> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, at, op)?);
        Ok(out)
    }

    fn take_line(&mut self, at: usize, op: Opcode) -> Result<String, DecodeFault> {
        let bytes = self.bytes;
        let rest = &bytes[self.pos..];
        let nl = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| Self::fault(at, DecodeFaultKind::Truncated(op.name())))?;
        let line = String::from_utf8_lossy(&rest[..nl]).into_owned();
        self.pos += nl + 1;
        Ok(line)
    }

    fn counted_len(&mut self, kind: ArgKind, at: usize, op: Opcode) -> Result<usize, DecodeFault> {
        let invalid = || Self::fault(at, DecodeFaultKind::InvalidLength(op.name()));
        match kind {
            ArgKind::Counted1 => Ok(self.take_array::<1>(at, op)?[0] as usize),
            // BINSTRING and LONG4 carry a signed length.
            ArgKind::Counted4 if matches!(op, Opcode::BinString | Opcode::Long4) => {
                let n = i32::from_le_bytes(self.take_array::<4>(at, op)?);
                usize::try_from(n).map_err(|_| invalid())
            }
            ArgKind::Counted4 => Ok(u32::from_le_bytes(self.take_array::<4>(at, op)?) as usize),
            ArgKind::Counted8 => {
                let n = u64::from_le_bytes(self.take_array::<8>(at, op)?);
                usize::try_from(n).map_err(|_| invalid())
            }
            _ => Err(invalid()),
        }
    }

    fn read_operand(&mut self, op: Opcode, at: usize) -> Result<Option<Operand>, DecodeFault> {
        let operand = match op.arg() {
            ArgKind::None => return Ok(None),
            ArgKind::U8 => Operand::Int(self.take_array::<1>(at, op)?[0] as i64),
            ArgKind::U16 => Operand::Int(u16::from_le_bytes(self.take_array(at, op)?) as i64),
            ArgKind::I32 => Operand::Int(i32::from_le_bytes(self.take_array(at, op)?) as i64),
            ArgKind::U32 => Operand::Int(u32::from_le_bytes(self.take_array(at, op)?) as i64),
            ArgKind::U64 => {
                let v = u64::from_le_bytes(self.take_array(at, op)?);
                Operand::Int(i64::try_from(v).unwrap_or(i64::MAX))
            }
            ArgKind::F64 => Operand::Float(f64::from_be_bytes(self.take_array(at, op)?)),
            ArgKind::Line => line_operand(op, self.take_line(at, op)?),
            ArgKind::QuotedLine => Operand::Text(unquote(&self.take_line(at, op)?).to_string()),
            ArgKind::TwoLines => {
                let module = self.take_line(at, op)?;
                let name = self.take_line(at, op)?;
                Operand::Global { module, name }
            }
            kind @ (ArgKind::Counted1 | ArgKind::Counted4 | ArgKind::Counted8) => {
                let len = self.counted_len(kind, at, op)?;
                let payload = self.take(len, at, op)?;
                if op.pushes_text() {
                    Operand::Text(String::from_utf8_lossy(payload).into_owned())
                } else if matches!(op, Opcode::Long1 | Opcode::Long4) {
                    decode_long(payload).map_or(Operand::Bytes(len), Operand::Int)
                } else {
                    Operand::Bytes(len)
                }
            }
        };
        Ok(Some(operand))
    }

    fn decode_one(&mut self) -> Result<Instruction, DecodeFault> {
        let at = self.pos;
        let byte = *self
            .bytes
            .get(at)
            .ok_or_else(|| Self::fault(at, DecodeFaultKind::MissingStop))?;
        let opcode =
            Opcode::from_byte(byte).ok_or_else(|| Self::fault(at, DecodeFaultKind::UnknownOpcode(byte)))?;
        self.pos += 1;

        let operand = self.read_operand(opcode, at)?;

        if opcode == Opcode::Proto {
            if let Some(Operand::Int(p)) = operand {
                if p > HIGHEST_PROTOCOL as i64 {
                    return Err(Self::fault(at, DecodeFaultKind::UnsupportedProtocol(p as u8)));
                }
            }
        }

        Ok(Instruction {
            opcode,
            operand,
            offset: at as u64,
        })
    }
}

impl Iterator for OpcodeReader<'_> {
    type Item = Result<Instruction, DecodeFault>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.decode_one() {
            Ok(instr) => {
                if instr.opcode == Opcode::Stop {
                    self.done = true;
                }
                Some(Ok(instr))
            }
            Err(fault) => {
                self.done = true;
                Some(Err(fault))
            }
        }
    }
}

fn line_operand(op: Opcode, line: String) -> Operand {
    let parsed = match op {
        Opcode::Int | Opcode::Get | Opcode::Put => line.trim().parse::<i64>().ok().map(Operand::Int),
        Opcode::Long => line.trim().trim_end_matches('L').parse::<i64>().ok().map(Operand::Int),
        Opcode::Float => line.trim().parse::<f64>().ok().map(Operand::Float),
        _ => None,
    };
    parsed.unwrap_or(Operand::Text(line))
}

fn unquote(line: &str) -> &str {
    let line = line.trim_end_matches('\r');
    for q in ['\'', '"'] {
        if line.len() >= 2 && line.starts_with(q) && line.ends_with(q) {
            return &line[1..line.len() - 1];
        }
    }
    line
}

/// Little-endian two's complement, as used by LONG1/LONG4.
fn decode_long(payload: &[u8]) -> Option<i64> {
    if payload.is_empty() {
        return Some(0);
    }
    if payload.len() > 8 {
        return None;
    }
    let fill = if payload[payload.len() - 1] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut buf = [fill; 8];
    buf[..payload.len()].copy_from_slice(payload);
    Some(i64::from_le_bytes(buf))
}
