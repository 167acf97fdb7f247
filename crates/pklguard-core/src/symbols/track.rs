//! Symbol resolution tracking.
//!
//! Consumes decoded instructions and records every module/attribute pair the
//! stream would import. The unpickling stack is shadowed with coarse slots
//! (text, imported symbol, mark, anything else) so that STACK_GLOBAL reads
//! the same two operands the real machine would, and calls are attributed
//! to the callable actually below their arguments. The memo table is
//! shadowed the same way.
//!
//! Whenever the shadow cannot tell what a slot holds, STACK_GLOBAL is
//! reported as unresolved rather than guessed.

use std::collections::HashMap;

use crate::pickle::opcodes::Opcode;
use crate::pickle::read::{Instruction, Operand};
use crate::symbols::model::{SymbolReference, Tracked};

/// Coarse view of one value on the unpickling stack.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Text(String),
    /// Index into `events` of an imported symbol.
    Symbol(usize),
    Mark,
    Other,
}

#[derive(Debug, Default)]
pub struct SymbolTracker {
    events: Vec<Tracked>,
    stack: Vec<Slot>,
    memo: HashMap<i64, Slot>,
}

impl SymbolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget per-stream state (stack, memo) at a stream boundary. Already
    /// recorded references are kept.
    pub fn start_stream(&mut self) {
        self.stack.clear();
        self.memo.clear();
    }

    pub fn observe(&mut self, instr: &Instruction) {
        use Opcode::*;

        let op = instr.opcode;
        match op {
            Proto | Frame | ReadOnlyBuffer => {}
            Stop => {
                self.pop();
            }

            Mark => self.stack.push(Slot::Mark),
            Pop => {
                self.pop();
            }
            PopMark => {
                self.pop_to_mark();
            }
            Dup => {
                let top = self.stack.last().cloned().unwrap_or(Slot::Other);
                self.stack.push(top);
            }

            String | BinString | ShortBinString | Unicode | BinUnicode | ShortBinUnicode
            | BinUnicode8 => {
                let text = instr
                    .operand
                    .as_ref()
                    .and_then(Operand::as_text)
                    .unwrap_or_default()
                    .to_string();
                self.stack.push(Slot::Text(text));
            }
            Float | Int | BinInt | BinInt1 | Long | BinInt2 | None | BinFloat | NewTrue
            | NewFalse | Long1 | Long4 | BinBytes | ShortBinBytes | BinBytes8 | ByteArray8
            | EmptyDict | EmptyList | EmptyTuple | EmptySet | PersId | NextBuffer => {
                self.stack.push(Slot::Other)
            }

            // Mutate the container below their operands in place.
            Append | Build => {
                self.pop();
            }
            BinPersId => {
                self.pop();
                self.stack.push(Slot::Other);
            }
            SetItem => self.pop_n(2),
            Appends | SetItems | AddItems => {
                self.pop_to_mark();
            }
            List | Tuple | Dict | FrozenSet => {
                self.pop_to_mark();
                self.stack.push(Slot::Other);
            }
            Tuple1 | Tuple2 | Tuple3 => {
                let n = match op {
                    Tuple1 => 1,
                    Tuple2 => 2,
                    _ => 3,
                };
                self.pop_n(n);
                self.stack.push(Slot::Other);
            }

            Global | Inst | StackGlobal => self.on_import(instr),
            // The extension registry maps a code to a global chosen at load time.
            Ext1 | Ext2 | Ext4 => self.unresolved(instr.offset),

            // callable/class, then its arguments
            Reduce | NewObj => self.on_call(2),
            NewObjEx => self.on_call(3),
            Obj => {
                let items = self.pop_to_mark();
                if let Some(Slot::Symbol(idx)) = items.first() {
                    self.mark_invoked(*idx);
                }
                self.stack.push(Slot::Other);
            }

            Put | BinPut | LongBinPut => {
                if let Some(i) = instr.operand.as_ref().and_then(Operand::as_int) {
                    let top = self.stack.last().cloned().unwrap_or(Slot::Other);
                    self.memo.insert(i, top);
                }
            }
            Memoize => {
                let i = self.memo.len() as i64;
                let top = self.stack.last().cloned().unwrap_or(Slot::Other);
                self.memo.insert(i, top);
            }
            Get | BinGet | LongBinGet => {
                let value = instr
                    .operand
                    .as_ref()
                    .and_then(Operand::as_int)
                    .and_then(|i| self.memo.get(&i).cloned())
                    .unwrap_or(Slot::Other);
                self.stack.push(value);
            }
        }
    }

    pub fn finish(self) -> Vec<Tracked> {
        self.events
    }

    /// Pop one slot. An empty shadow stack reads as unknown.
    fn pop(&mut self) -> Slot {
        self.stack.pop().unwrap_or(Slot::Other)
    }

    fn pop_n(&mut self, n: usize) {
        let keep = self.stack.len().saturating_sub(n);
        self.stack.truncate(keep);
    }

    /// Remove everything above the topmost mark, and the mark itself.
    /// Returns the removed items, bottom first.
    fn pop_to_mark(&mut self) -> Vec<Slot> {
        match self.stack.iter().rposition(|s| *s == Slot::Mark) {
            Some(at) => {
                let items = self.stack.split_off(at + 1);
                self.stack.truncate(at);
                items
            }
            Option::None => std::mem::take(&mut self.stack),
        }
    }

    fn mark_invoked(&mut self, idx: usize) {
        if let Some(Tracked::Symbol(r)) = self.events.get_mut(idx) {
            r.invoked = true;
        }
    }

    /// `depth` slots are consumed; the deepest one is the callable.
    fn on_call(&mut self, depth: usize) {
        let callable = self
            .stack
            .len()
            .checked_sub(depth)
            .map(|at| self.stack[at].clone());
        if let Some(Slot::Symbol(idx)) = callable {
            self.mark_invoked(idx);
        }
        self.pop_n(depth);
        self.stack.push(Slot::Other);
    }

    fn record(&mut self, reference: SymbolReference) -> usize {
        self.events.push(Tracked::Symbol(reference));
        self.events.len() - 1
    }

    fn unresolved(&mut self, offset: u64) {
        self.events.push(Tracked::Unresolved { offset });
        self.stack.push(Slot::Other);
    }

    fn on_import(&mut self, instr: &Instruction) {
        let name = instr.opcode.name();
        match (instr.opcode, &instr.operand) {
            (Opcode::Global, Some(Operand::Global { module, name: attr })) => {
                let idx = self.record(SymbolReference::new(module, attr, instr.offset, name));
                self.stack.push(Slot::Symbol(idx));
            }
            (Opcode::Inst, Some(Operand::Global { module, name: attr })) => {
                // INST imports and instantiates in one step.
                let mut reference = SymbolReference::new(module, attr, instr.offset, name);
                reference.invoked = true;
                self.record(reference);
                self.pop_to_mark();
                self.stack.push(Slot::Other);
            }
            (Opcode::StackGlobal, _) => {
                let attr = self.pop();
                let module = self.pop();
                match (module, attr) {
                    (Slot::Text(module), Slot::Text(attr)) => {
                        let idx =
                            self.record(SymbolReference::new(module, attr, instr.offset, name));
                        self.stack.push(Slot::Symbol(idx));
                    }
                    _ => self.unresolved(instr.offset),
                }
            }
            _ => self.unresolved(instr.offset),
        }
    }
}

/// Track a complete instruction sequence from a single stream.
pub fn track<'a, I>(instructions: I) -> Vec<Tracked>
where
    I: IntoIterator<Item = &'a Instruction>,
{
    let mut tracker = SymbolTracker::new();
    for instr in instructions {
        tracker.observe(instr);
    }
    tracker.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pickle::read::OpcodeReader;

    fn track_bytes(bytes: &[u8]) -> Vec<Tracked> {
        let instrs: Vec<Instruction> = OpcodeReader::new(bytes)
            .collect::<Result<_, _>>()
            .expect("fixture decodes");
        track(&instrs)
    }

    fn symbols(events: &[Tracked]) -> Vec<&SymbolReference> {
        events
            .iter()
            .filter_map(|e| match e {
                Tracked::Symbol(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn no_imports_yields_nothing() {
        let events = track_bytes(b"(lp0\nI1\naI2\na.");
        assert!(events.is_empty());
    }

    #[test]
    fn global_followed_by_reduce_is_invoked() {
        let events = track_bytes(b"cos\nsystem\n(S'id'\ntR.");
        let refs = symbols(&events);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].module, "os");
        assert_eq!(refs[0].qualified_name, "system");
        assert_eq!(refs[0].offset, 0);
        assert_eq!(refs[0].opcode, "GLOBAL");
        assert!(refs[0].invoked);
    }

    #[test]
    fn global_without_call_is_not_invoked() {
        let events = track_bytes(b"cbuiltins\nprint\n.");
        let refs = symbols(&events);
        assert_eq!(refs.len(), 1);
        assert!(!refs[0].invoked);
    }

    #[test]
    fn nested_calls_mark_both_symbols() {
        // os.system(builtins.str("x"))
        let events = track_bytes(b"cos\nsystem\n(cbuiltins\nstr\n(S'x'\ntRtR.");
        let refs = symbols(&events);
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.invoked));
    }

    #[test]
    fn inst_is_invoked_on_import() {
        let events = track_bytes(b"(S'ls'\nisubprocess\nPopen\n.");
        let refs = symbols(&events);
        assert_eq!(refs[0].module, "subprocess");
        assert_eq!(refs[0].qualified_name, "Popen");
        assert_eq!(refs[0].offset, 7);
        assert!(refs[0].invoked);
    }

    #[test]
    fn stack_global_resolves_memoized_operands() {
        // PROTO 4, "builtins" MEMOIZE, "eval" MEMOIZE, STACK_GLOBAL, MEMOIZE,
        // "1+1" TUPLE1 REDUCE STOP
        let mut bytes = vec![0x80, 0x04];
        bytes.extend([0x8c, 8]);
        bytes.extend(b"builtins");
        bytes.push(0x94);
        bytes.extend([0x8c, 4]);
        bytes.extend(b"eval");
        bytes.push(0x94);
        let sg_offset = bytes.len() as u64;
        bytes.extend([0x93, 0x94]);
        bytes.extend([0x8c, 3]);
        bytes.extend(b"1+1");
        bytes.extend([0x85, b'R', b'.']);

        let events = track_bytes(&bytes);
        let refs = symbols(&events);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].module, "builtins");
        assert_eq!(refs[0].qualified_name, "eval");
        assert_eq!(refs[0].offset, sg_offset);
        assert_eq!(refs[0].opcode, "STACK_GLOBAL");
        assert!(refs[0].invoked);
    }

    #[test]
    fn stack_global_reads_operands_through_binget() {
        // Module and name strings are memoized early and fetched back.
        let mut bytes = vec![0x80, 0x02];
        bytes.extend([b'X', 2, 0, 0, 0]);
        bytes.extend(b"os");
        bytes.extend([b'q', 0]);
        bytes.extend([b'X', 5, 0, 0, 0]);
        bytes.extend(b"popen");
        bytes.extend([b'q', 1, b'0', b'0']);
        bytes.extend([b'h', 0, b'h', 1]);
        bytes.extend([0x93, b'.']);

        let events = track_bytes(&bytes);
        let refs = symbols(&events);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].module, "os");
        assert_eq!(refs[0].qualified_name, "popen");
    }

    #[test]
    fn stack_global_without_operands_is_unresolved() {
        let events = track_bytes(&[0x80, 0x04, 0x93, b'.']);
        assert_eq!(events, vec![Tracked::Unresolved { offset: 2 }]);
    }

    fn short_text(bytes: &mut Vec<u8>, text: &str) {
        bytes.extend([0x8c, text.len() as u8]);
        bytes.extend(text.as_bytes());
    }

    #[test]
    fn stack_global_reads_operands_left_after_pops() {
        // Decoy strings pushed on top and popped again must not be taken as
        // the STACK_GLOBAL operands.
        let mut bytes = vec![0x80, 0x04];
        for text in ["os", "system", "collections", "OrderedDict"] {
            short_text(&mut bytes, text);
        }
        bytes.extend([b'0', b'0']);
        let sg_offset = bytes.len() as u64;
        bytes.push(0x93);
        short_text(&mut bytes, "id");
        bytes.extend([0x85, b'R', b'.']);

        let events = track_bytes(&bytes);
        let refs = symbols(&events);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].module, "os");
        assert_eq!(refs[0].qualified_name, "system");
        assert_eq!(refs[0].offset, sg_offset);
        assert!(refs[0].invoked);
    }

    #[test]
    fn stack_global_after_pop_mark_uses_text_below_mark() {
        // "os" "system" MARK "collections" "OrderedDict" POP_MARK STACK_GLOBAL
        let mut bytes = vec![0x80, 0x04];
        short_text(&mut bytes, "os");
        short_text(&mut bytes, "system");
        bytes.push(b'(');
        short_text(&mut bytes, "collections");
        short_text(&mut bytes, "OrderedDict");
        bytes.extend([b'1', 0x93, b'.']);

        let events = track_bytes(&bytes);
        let refs = symbols(&events);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].to_string(), "os.system");
    }

    #[test]
    fn stack_global_over_non_text_is_unresolved() {
        // The two strings were folded into a tuple; the operands are unknown.
        let mut bytes = vec![0x80, 0x04];
        short_text(&mut bytes, "collections");
        short_text(&mut bytes, "OrderedDict");
        bytes.push(0x86);
        short_text(&mut bytes, "x");
        bytes.extend([0x93, b'.']);

        let events = track_bytes(&bytes);
        assert!(symbols(&events).is_empty());
        assert!(matches!(events[..], [Tracked::Unresolved { .. }]));
    }

    #[test]
    fn call_marks_the_callable_below_its_arguments() {
        // os.system is pushed but never called; builtins.print is called.
        let events = track_bytes(b"cos\nsystem\ncbuiltins\nprint\n(S'x'\ntR0.");
        let refs = symbols(&events);
        assert_eq!(refs.len(), 2);
        assert!(!refs[0].invoked);
        assert!(refs[1].invoked);
    }

    #[test]
    fn newobj_ex_marks_class() {
        // cls args kwargs NEWOBJ_EX
        let events = track_bytes(b"\x80\x04cmypkg\nThing\n)}\x92.");
        assert!(symbols(&events)[0].invoked);
    }

    #[test]
    fn extension_codes_are_unresolved() {
        let events = track_bytes(b"\x80\x02\x82\x01.");
        assert_eq!(events, vec![Tracked::Unresolved { offset: 2 }]);
    }

    #[test]
    fn memoized_callable_reused_via_get_is_invoked() {
        // The callable is memoized, popped, then fetched back and called.
        let bytes = b"ctorch._utils\n_rebuild_tensor_v2\np0\n0g0\n(tR.";
        let events = track_bytes(bytes);
        let refs = symbols(&events);
        assert_eq!(refs.len(), 1);
        assert!(refs[0].invoked);
    }

    #[test]
    fn start_stream_resets_memo_but_keeps_events() {
        let mut tracker = SymbolTracker::new();
        for instr in OpcodeReader::new(b"cos\nsystem\np0\n.") {
            tracker.observe(&instr.unwrap());
        }
        tracker.start_stream();
        for instr in OpcodeReader::new(b"g0\n(tR.") {
            tracker.observe(&instr.unwrap());
        }
        let events = tracker.finish();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Tracked::Symbol(r) => assert!(!r.invoked),
            other => panic!("unexpected {other:?}"),
        }
    }
}
