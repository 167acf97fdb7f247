//! Pickle opcode table (protocols 0 through 5).
//!
//! Each opcode is described by its wire byte, the shape of its inline
//! operand and the class of effect it would have on the unpickling machine.
//! The class is what the rest of the scanner keys on; nothing here executes.

/// Highest pickle protocol the reader understands.
pub const HIGHEST_PROTOCOL: u8 = 5;

/// Shape of the inline operand that follows an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    None,
    /// 1-byte unsigned integer.
    U8,
    /// 2-byte little-endian unsigned integer.
    U16,
    /// 4-byte little-endian signed integer.
    I32,
    /// 4-byte little-endian unsigned integer.
    U32,
    /// 8-byte little-endian unsigned integer (frame sizes).
    U64,
    /// 8-byte big-endian IEEE-754 double.
    F64,
    /// Newline-terminated text.
    Line,
    /// Newline-terminated string literal in `repr` form (quoted).
    QuotedLine,
    /// Two newline-terminated text fields: module then name.
    TwoLines,
    /// 1-byte length prefix, then that many bytes.
    Counted1,
    /// 4-byte little-endian length prefix, then that many bytes.
    Counted4,
    /// 8-byte little-endian length prefix, then that many bytes.
    Counted8,
}

/// What an opcode would do to the unpickling machine, coarsely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// Pushes a primitive literal (numbers, strings, bytes, booleans, None).
    Literal,
    /// Builds or extends a list, tuple, dict or set.
    Container,
    /// Resolves a module-level symbol by name.
    Import,
    /// Calls or instantiates a previously pushed callable.
    Invoke,
    /// Reads or writes the memo table.
    Memo,
    /// Pure stack bookkeeping (MARK, POP, DUP).
    Stack,
    /// Protocol and framing markers.
    Framing,
    /// Persistent ids, extension registry, out-of-band buffers.
    External,
    /// STOP.
    Stop,
}

macro_rules! opcodes {
    ($( $variant:ident = $byte:literal, $name:literal, $arg:ident, $class:ident; )*) => {
        /// A decoded pickle opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $variant, )*
        }

        impl Opcode {
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $byte => Some(Opcode::$variant), )*
                    _ => None,
                }
            }

            pub fn byte(self) -> u8 {
                match self {
                    $( Opcode::$variant => $byte, )*
                }
            }

            /// Canonical opcode name as used by the pickle documentation.
            pub fn name(self) -> &'static str {
                match self {
                    $( Opcode::$variant => $name, )*
                }
            }

            pub fn arg(self) -> ArgKind {
                match self {
                    $( Opcode::$variant => ArgKind::$arg, )*
                }
            }

            pub fn class(self) -> OpClass {
                match self {
                    $( Opcode::$variant => OpClass::$class, )*
                }
            }
        }
    };
}

opcodes! {
    // Protocol 0 / 1
    Mark = b'(', "MARK", None, Stack;
    Stop = b'.', "STOP", None, Stop;
    Pop = b'0', "POP", None, Stack;
    PopMark = b'1', "POP_MARK", None, Stack;
    Dup = b'2', "DUP", None, Stack;
    Float = b'F', "FLOAT", Line, Literal;
    Int = b'I', "INT", Line, Literal;
    BinInt = b'J', "BININT", I32, Literal;
    BinInt1 = b'K', "BININT1", U8, Literal;
    Long = b'L', "LONG", Line, Literal;
    BinInt2 = b'M', "BININT2", U16, Literal;
    None = b'N', "NONE", None, Literal;
    PersId = b'P', "PERSID", Line, External;
    BinPersId = b'Q', "BINPERSID", None, External;
    Reduce = b'R', "REDUCE", None, Invoke;
    String = b'S', "STRING", QuotedLine, Literal;
    BinString = b'T', "BINSTRING", Counted4, Literal;
    ShortBinString = b'U', "SHORT_BINSTRING", Counted1, Literal;
    Unicode = b'V', "UNICODE", Line, Literal;
    BinUnicode = b'X', "BINUNICODE", Counted4, Literal;
    Append = b'a', "APPEND", None, Container;
    Build = b'b', "BUILD", None, Container;
    Global = b'c', "GLOBAL", TwoLines, Import;
    Dict = b'd', "DICT", None, Container;
    EmptyDict = b'}', "EMPTY_DICT", None, Container;
    Appends = b'e', "APPENDS", None, Container;
    Get = b'g', "GET", Line, Memo;
    BinGet = b'h', "BINGET", U8, Memo;
    Inst = b'i', "INST", TwoLines, Import;
    LongBinGet = b'j', "LONG_BINGET", U32, Memo;
    List = b'l', "LIST", None, Container;
    EmptyList = b']', "EMPTY_LIST", None, Container;
    Obj = b'o', "OBJ", None, Invoke;
    Put = b'p', "PUT", Line, Memo;
    BinPut = b'q', "BINPUT", U8, Memo;
    LongBinPut = b'r', "LONG_BINPUT", U32, Memo;
    SetItem = b's', "SETITEM", None, Container;
    Tuple = b't', "TUPLE", None, Container;
    EmptyTuple = b')', "EMPTY_TUPLE", None, Container;
    SetItems = b'u', "SETITEMS", None, Container;
    BinFloat = b'G', "BINFLOAT", F64, Literal;
    // Protocol 2
    Proto = 0x80, "PROTO", U8, Framing;
    NewObj = 0x81, "NEWOBJ", None, Invoke;
    Ext1 = 0x82, "EXT1", U8, External;
    Ext2 = 0x83, "EXT2", U16, External;
    Ext4 = 0x84, "EXT4", I32, External;
    Tuple1 = 0x85, "TUPLE1", None, Container;
    Tuple2 = 0x86, "TUPLE2", None, Container;
    Tuple3 = 0x87, "TUPLE3", None, Container;
    NewTrue = 0x88, "NEWTRUE", None, Literal;
    NewFalse = 0x89, "NEWFALSE", None, Literal;
    Long1 = 0x8a, "LONG1", Counted1, Literal;
    Long4 = 0x8b, "LONG4", Counted4, Literal;
    // Protocol 3
    BinBytes = b'B', "BINBYTES", Counted4, Literal;
    ShortBinBytes = b'C', "SHORT_BINBYTES", Counted1, Literal;
    // Protocol 4
    ShortBinUnicode = 0x8c, "SHORT_BINUNICODE", Counted1, Literal;
    BinUnicode8 = 0x8d, "BINUNICODE8", Counted8, Literal;
    BinBytes8 = 0x8e, "BINBYTES8", Counted8, Literal;
    EmptySet = 0x8f, "EMPTY_SET", None, Container;
    AddItems = 0x90, "ADDITEMS", None, Container;
    FrozenSet = 0x91, "FROZENSET", None, Container;
    NewObjEx = 0x92, "NEWOBJ_EX", None, Invoke;
    StackGlobal = 0x93, "STACK_GLOBAL", None, Import;
    Memoize = 0x94, "MEMOIZE", None, Memo;
    Frame = 0x95, "FRAME", U64, Framing;
    // Protocol 5
    ByteArray8 = 0x96, "BYTEARRAY8", Counted8, Literal;
    NextBuffer = 0x97, "NEXT_BUFFER", None, External;
    ReadOnlyBuffer = 0x98, "READONLY_BUFFER", None, External;
}

impl Opcode {
    /// Whether the literal this opcode pushes is text that a later
    /// STACK_GLOBAL could consume as a module or attribute name.
    pub fn pushes_text(self) -> bool {
        matches!(
            self,
            Opcode::String
                | Opcode::BinString
                | Opcode::ShortBinString
                | Opcode::Unicode
                | Opcode::BinUnicode
                | Opcode::ShortBinUnicode
                | Opcode::BinUnicode8
        )
    }

    /// Opcodes that can plausibly open a protocol 0/1 stream, which has no
    /// PROTO header. Used by format detection to avoid treating arbitrary
    /// text as bytecode.
    pub fn can_start_stream(self) -> bool {
        matches!(
            self,
            Opcode::Mark
                | Opcode::EmptyList
                | Opcode::EmptyDict
                | Opcode::EmptyTuple
                | Opcode::Global
                | Opcode::Inst
                | Opcode::None
                | Opcode::Int
                | Opcode::Long
                | Opcode::Float
                | Opcode::String
                | Opcode::Unicode
                | Opcode::BinInt
                | Opcode::BinInt1
                | Opcode::BinInt2
                | Opcode::BinFloat
                | Opcode::BinUnicode
                | Opcode::ShortBinString
                | Opcode::BinString
        )
    }
}
