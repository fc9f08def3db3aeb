use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Attribute, Ident, ItemFn, LitInt, Token, parse_macro_input};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Runs an async test on its own thread and Tokio runtime, failing it when
/// it does not finish within the deadline.
///
/// Accepted forms:
/// `#[tokio_timeout_test]`, `#[tokio_timeout_test(30)]`,
/// `#[tokio_timeout_test(secs = 30, worker_threads = 2)]`.
///
/// `BEACH_CHAT_TEST_TIMEOUT_SECS` overrides the deadline at run time, which
/// helps when stepping through a negotiation under a debugger.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = parse_macro_input!(attr as TestOptions);

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

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let timeout = options.secs;
    let runtime = match options.worker_threads {
        Some(threads) => quote! {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(#threads)
                .enable_all()
                .build()
        },
        None => quote! {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
        },
    };

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_secs = std::env::var("BEACH_CHAT_TEST_TIMEOUT_SECS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(#timeout);
            let timeout_duration = std::time::Duration::from_secs(timeout_secs);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = #runtime.expect("failed to build Tokio runtime");
                    runtime.block_on(async {
                        tokio::time::timeout(timeout_duration, async move #block)
                            .await
                            .expect("test timed out");
                    });
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration + std::time::Duration::from_secs(1)) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

struct TestOptions {
    secs: u64,
    worker_threads: Option<usize>,
}

impl Parse for TestOptions {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut options = TestOptions {
            secs: DEFAULT_TIMEOUT_SECS,
            worker_threads: None,
        };
        if input.is_empty() {
            return Ok(options);
        }
        if input.peek(LitInt) {
            let lit: LitInt = input.parse()?;
            options.secs = positive(&lit)?;
            return Ok(options);
        }
        let pairs = Punctuated::<OptionPair, Token![,]>::parse_terminated(input)?;
        for pair in pairs {
            match pair.key.to_string().as_str() {
                "secs" => options.secs = positive(&pair.value)?,
                "worker_threads" => options.worker_threads = Some(positive(&pair.value)? as usize),
                other => {
                    return Err(syn::Error::new_spanned(
                        &pair.key,
                        format!("unknown tokio_timeout_test option `{other}`"),
                    ));
                }
            }
        }
        Ok(options)
    }
}

struct OptionPair {
    key: Ident,
    value: LitInt,
}

impl Parse for OptionPair {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let key: Ident = input.parse()?;
        input.parse::<Token![=]>()?;
        let value: LitInt = input.parse()?;
        Ok(OptionPair { key, value })
    }
}

fn positive(lit: &LitInt) -> syn::Result<u64> {
    let value: u64 = lit.base10_parse()?;
    if value == 0 {
        return Err(syn::Error::new_spanned(lit, "value must be greater than zero"));
    }
    Ok(value)
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}
