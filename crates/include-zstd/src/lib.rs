//! `include_zstd!("relative/path" [, level])` embeds a file as zstd-compressed bytes.
//!
//! The path is resolved against the invoking crate's `CARGO_MANIFEST_DIR`.
//! Decode at runtime with `zstd::decode_all`.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use std::env;
use std::fs;
use std::path::PathBuf;
use syn::parse::{Parse, ParseStream};
use syn::{Error, LitByteStr, LitInt, LitStr, Token, parse_macro_input};

const DEFAULT_LEVEL: i32 = 19;

macro_rules! bail {
    ($call:expr) => {
        match $call {
            Ok(val) => val,
            Err(err) => return Error::new(Span::call_site(), err).to_compile_error().into(),
        }
    };
}

struct IncludeArgs {
    path: LitStr,
    level: Option<LitInt>,
}

impl Parse for IncludeArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let path: LitStr = input.parse()?;
        let level = if input.peek(Token![,]) {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                None
            } else {
                Some(input.parse()?)
            }
        } else {
            None
        };
        Ok(Self { path, level })
    }
}

#[proc_macro]
pub fn include_zstd(input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(input as IncludeArgs);
    let level = match args.level {
        Some(lit) => bail!(lit.base10_parse::<i32>()),
        None => DEFAULT_LEVEL,
    };

    let manifest_dir = bail!(env::var("CARGO_MANIFEST_DIR"));
    let full_path = PathBuf::from(manifest_dir).join(args.path.value());

    let content = bail!(fs::read(&full_path));
    let compressed_data = bail!(zstd::stream::encode_all(&content[..], level));

    let literal_bytes = LitByteStr::new(&compressed_data, Span::call_site());
    let path_str = full_path.to_string_lossy().into_owned();

    // Referencing the file through include_bytes! makes cargo rebuild when it changes.
    let output = quote!({
        const _: &[u8] = include_bytes!(#path_str);
        #literal_bytes
    });

    output.into()
}
