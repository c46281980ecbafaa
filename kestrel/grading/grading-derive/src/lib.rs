use proc_macro::TokenStream;
use quote::quote_spanned;
use syn::{Expr, ItemFn, LitInt, parse_macro_input, spanned::Spanned};

#[proc_macro_attribute]
pub fn boot(attr: TokenStream, item: TokenStream) -> TokenStream {
    let builder: Expr = if attr.is_empty() {
        syn::parse_quote! { kestrel::SystemConfigurationBuilder::new() }
    } else {
        parse_macro_input!(attr as Expr)
    };
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            let _kernel = kestrel::Kernel::bootstrap((#builder).build());
            let _return_val = (move || { #block })();
            _kernel.shutdown();
            _return_val
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}

#[proc_macro_attribute]
pub fn assert_exit_code(attr: TokenStream, item: TokenStream) -> TokenStream {
    let code = parse_macro_input!(attr as LitInt);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            fn _f() {}
            fn _get_name<T>(_: T) -> &'static str {
                let n = core::any::type_name::<T>();
                &n[..n.len() - 4]
            }
            assert_eq!(
                kestrel::thread::ThreadBuilder::new(_get_name(_f))
                    .spawn(move || { #block })
                    .and_then(|handle| handle.join()),
                Ok(#code)
            );
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}
