//! Test attributes that fail a test instead of hanging it.
//!
//! `#[tokio_timeout_test]` runs an async test body on its own runtime;
//! `#[timeout]` guards a synchronous one. Both take an optional number of
//! seconds (default 60). The async form also accepts `multi_thread` to run
//! on a multi-threaded runtime: `#[tokio_timeout_test(5, multi_thread)]`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream, Parser};
use syn::punctuated::Punctuated;
use syn::{Attribute, ItemFn, LitInt, Meta, Token, parse_macro_input};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

enum Runtime {
    CurrentThread,
    MultiThread,
}

struct Options {
    secs: u64,
    runtime: Runtime,
}

impl Parse for Options {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut options = Options {
            secs: DEFAULT_TIMEOUT_SECS,
            runtime: Runtime::CurrentThread,
        };
        let args = Punctuated::<Meta, Token![,]>::parse_terminated(input)?;
        for arg in args {
            match arg {
                Meta::Path(path) if path.is_ident("multi_thread") => {
                    options.runtime = Runtime::MultiThread;
                }
                Meta::Path(path) if path.is_ident("current_thread") => {
                    options.runtime = Runtime::CurrentThread;
                }
                other => {
                    return Err(syn::Error::new_spanned(other, "unsupported timeout option"));
                }
            }
        }
        Ok(options)
    }
}

fn parse_options(attr: TokenStream) -> syn::Result<Options> {
    if attr.is_empty() {
        return Ok(Options {
            secs: DEFAULT_TIMEOUT_SECS,
            runtime: Runtime::CurrentThread,
        });
    }
    parse_attr.parse(attr)
}

/// `[secs] [, option]*` where the seconds literal, if present, comes first.
fn parse_attr(input: ParseStream) -> syn::Result<Options> {
    let mut secs = DEFAULT_TIMEOUT_SECS;
    if input.peek(LitInt) {
        let lit: LitInt = input.parse()?;
        secs = lit.base10_parse()?;
        if secs == 0 {
            return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
        }
        if input.is_empty() {
            return Ok(Options {
                secs,
                runtime: Runtime::CurrentThread,
            });
        }
        input.parse::<Token![,]>()?;
    }
    let mut options: Options = input.parse()?;
    options.secs = secs;
    Ok(options)
}

/// Runs `body` on a watchdog thread and panics if it has not reported back
/// within `secs`. Panics from the body are re-raised on the test thread.
fn watchdog(secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let timeout_duration = std::time::Duration::from_secs(#secs);
        let (sender, receiver) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
            let _ = sender.send(result);
        });
        match receiver.recv_timeout(timeout_duration) {
            Ok(Ok(_)) => {}
            Ok(Err(payload)) => std::panic::resume_unwind(payload),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                panic!("test timed out after {}s", #secs)
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                panic!("test thread failed before reporting result")
            }
        }
    }
}

fn strip_attrs(attrs: Vec<Attribute>, drop: &[&[&str]]) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let segments: Vec<String> = attr
                .path()
                .segments
                .iter()
                .map(|segment| segment.ident.to_string())
                .collect();
            !drop.iter().any(|path| segments.iter().map(String::as_str).eq(path.iter().copied()))
        })
        .collect()
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match parse_options(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs = strip_attrs(attrs, &[&["tokio", "test"], &["test"]]);
    let builder = match options.runtime {
        Runtime::CurrentThread => quote! { tokio::runtime::Builder::new_current_thread() },
        Runtime::MultiThread => quote! { tokio::runtime::Builder::new_multi_thread() },
    };
    let secs = options.secs;
    let body = watchdog(
        secs,
        quote! {
            let runtime = #builder
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(std::time::Duration::from_secs(#secs), async move #block)
                    .await
                    .expect("test timed out");
            });
        },
    );

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #body
        }
    })
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match parse_options(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }

    let attrs = strip_attrs(attrs, &[&["test"]]);
    let body = watchdog(options.secs, quote! { #block });

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #body
        }
    })
}
