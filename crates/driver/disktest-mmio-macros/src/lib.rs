//! Proc-macro crate for the `register_block!` register DSL.
//!
//! Generates typed register accessors from a declarative definition. The
//! generated struct is generic over a `disktest_mmio::RegisterBus`, so the same
//! definition drives volatile MMIO on hardware and a software model in tests.

mod codegen;
mod parse;

use proc_macro::TokenStream;
use syn::parse_macro_input;

use crate::parse::RegisterBlock;

/// Generates a typed register block struct with safe accessors.
///
/// # Syntax
///
/// ```ignore
/// register_block! {
///     /// Doc comment for the struct.
///     pub StructName {
///         /// Doc comment for the register.
///         [offset; width; access_mode] name => OptionalBitflagsType,
///     }
/// }
/// ```
///
/// - `offset`: byte offset from the block base (integer literal, e.g. `0x04`)
/// - `width`: `u32` or `u64`
/// - `access_mode`: `ro` (read-only), `wo` (write-only), `rw` (read-write),
///   `w1c` (readable, write-1-to-clear)
/// - `name`: register name (generates method names)
/// - `=> Type`: optional bitflags type (must have `from_bits_retain`/`.bits()`)
///
/// # Generated Code
///
/// For each register, generates:
/// - `ro`/`rw`/`w1c`: `fn name(&self) -> Type` (reader)
/// - `wo`/`rw`: `fn set_name(&self, value: Type)` (writer)
/// - `w1c`: `fn clear_name(&self, value: Type)` (writes ones to clear)
#[proc_macro]
pub fn register_block(input: TokenStream) -> TokenStream {
    let block = parse_macro_input!(input as RegisterBlock);
    codegen::generate(&block).into()
}
