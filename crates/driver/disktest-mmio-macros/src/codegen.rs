//! Code generation for the `register_block!` macro.
//!
//! Transforms the parsed register block definition into a struct, generic
//! over `::disktest_mmio::RegisterBus`, with typed accessor methods.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::parse::{AccessMode, RegisterBlock, RegisterDef};

/// Generates the complete output for a register block definition.
pub fn generate(block: &RegisterBlock) -> TokenStream {
    let vis = &block.vis;
    let name = &block.name;
    let attrs = &block.attrs;

    let methods: Vec<TokenStream> = block.registers.iter().map(generate_methods).collect();

    quote! {
        #(#attrs)*
        #[derive(Debug, Clone)]
        #vis struct #name<B> {
            bus: B,
        }

        impl<B: ::disktest_mmio::RegisterBus> #name<B> {
            /// Creates a register block accessor over `bus`, whose offset 0 is
            /// the first register of this block.
            #vis fn new(bus: B) -> Self {
                Self { bus }
            }

            /// Returns the underlying bus.
            #[must_use]
            #vis fn bus(&self) -> &B {
                &self.bus
            }

            #(#methods)*
        }
    }
}

/// Generates accessor methods for a single register.
fn generate_methods(reg: &RegisterDef) -> TokenStream {
    let mut methods = TokenStream::new();

    if reg.access.readable() {
        methods.extend(generate_read(reg));
    }
    if reg.access.writable() {
        methods.extend(generate_write(reg));
    }
    if reg.access == AccessMode::WriteOneToClear {
        methods.extend(generate_clear(reg));
    }

    methods
}

/// Generates the read accessor for a register.
fn generate_read(reg: &RegisterDef) -> TokenStream {
    let name = &reg.name;
    let offset = &reg.offset;
    let width_ty = width_type(reg);
    let read = format_ident!("read_{}", reg.width.bus_suffix());
    let attrs = &reg.attrs;

    if let Some(ref bf_type) = reg.bitflags_type {
        quote! {
            #(#attrs)*
            #[inline]
            pub fn #name(&self) -> #bf_type {
                #bf_type::from_bits_retain(
                    ::disktest_mmio::RegisterBus::#read(&self.bus, #offset)
                )
            }
        }
    } else {
        quote! {
            #(#attrs)*
            #[inline]
            pub fn #name(&self) -> #width_ty {
                ::disktest_mmio::RegisterBus::#read(&self.bus, #offset)
            }
        }
    }
}

/// Generates the `set_` accessor for a register.
fn generate_write(reg: &RegisterDef) -> TokenStream {
    let setter_name = format_ident!("set_{}", reg.name);
    let doc = format!("Writes the `{}` register.", reg.name);
    store_method(reg, &setter_name, &doc)
}

/// Generates the `clear_` accessor for a write-1-to-clear register.
fn generate_clear(reg: &RegisterDef) -> TokenStream {
    let clear_name = format_ident!("clear_{}", reg.name);
    let doc = format!(
        "Clears the set bits of `value` in the `{}` register (write-1-to-clear).",
        reg.name
    );
    store_method(reg, &clear_name, &doc)
}

/// Generates a method that stores `value` at the register offset.
fn store_method(reg: &RegisterDef, method: &proc_macro2::Ident, doc: &str) -> TokenStream {
    let offset = &reg.offset;
    let width_ty = width_type(reg);
    let write = format_ident!("write_{}", reg.width.bus_suffix());

    if let Some(ref bf_type) = reg.bitflags_type {
        quote! {
            #[doc = #doc]
            #[inline]
            pub fn #method(&self, value: #bf_type) {
                ::disktest_mmio::RegisterBus::#write(&self.bus, #offset, value.bits());
            }
        }
    } else {
        quote! {
            #[doc = #doc]
            #[inline]
            pub fn #method(&self, value: #width_ty) {
                ::disktest_mmio::RegisterBus::#write(&self.bus, #offset, value);
            }
        }
    }
}

/// Returns the token stream for the register's width type.
fn width_type(reg: &RegisterDef) -> TokenStream {
    let ident = format_ident!("{}", reg.width.type_name());
    quote! { #ident }
}
