use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{Ident, ItemFn};

/// Proc macro to denote a Scenario
///
/// The function must be `async` and take no arguments. It becomes the iteration body
/// run by every virtual user, and calling it returns a [`Scenario`] to configure and
/// await.
///
/// # Example
/// ```ignore
/// use volley::prelude::*;
///
/// #[scenario]
/// async fn my_scenario() {
/// }
/// ```
///
/// [`Scenario`]: https://docs.rs/volley/latest/volley/scenario/struct.Scenario.html
#[proc_macro_attribute]
pub fn scenario(attr: TokenStream, item: TokenStream) -> TokenStream {
    scenario_internal(attr, item, false).into()
}

/// Proc macro to denote a Scenario, registered with the runtime
///
/// Same as [`macro@scenario`], and also adds the scenario to the list the `VolleyRuntime`
/// picks from by name.
///
/// # Example
/// ```ignore
/// use volley::prelude::*;
///
/// #[scenario]
/// async fn my_scenario() {
/// }
///
/// #[tokio::main]
/// async fn main() -> std::process::ExitCode {
///     VolleyRuntime::new().with_args().run().await
/// }
/// ```
#[proc_macro_attribute]
pub fn scenario_linkme(attr: TokenStream, item: TokenStream) -> TokenStream {
    scenario_internal(attr, item, true).into()
}

fn scenario_internal(_attr: TokenStream, item: TokenStream, linkme: bool) -> TokenStream2 {
    let input = match syn::parse::<ItemFn>(item) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error(),
    };

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(sig.fn_token, "Scenarios must be async functions")
            .to_compile_error();
    }
    if !sig.inputs.is_empty() {
        return syn::Error::new_spanned(&sig.inputs, "Scenarios take no arguments")
            .to_compile_error();
    }

    let stmts = &block.stmts;
    let scen_name = sig.ident.clone();

    let new_name = Ident::new(&format!("__volley_{}", scen_name), Span::call_site());
    let mut new_sig = sig.clone();
    new_sig.ident = new_name.clone();

    let mut scen_sig = sig.clone();
    scen_sig.asyncness = None;
    scen_sig.output = syn::parse_quote! {
        -> impl ::volley::scenario::ConfigurableScenario<::volley::RunResult>
    };

    let mut res = quote! {
        #(#attrs)* #vis #scen_sig {
            ::volley::scenario::Scenario::new(stringify!(#scen_name), #new_name)
        }

        #(#attrs)* #vis #new_sig {
            #(#stmts)*
        }
    };

    if linkme {
        let static_name = Ident::new(
            &format!("__VOLLEY_SCENARIO_{}", scen_name.to_string().to_uppercase()),
            Span::call_site(),
        );
        let register_name = Ident::new(&format!("__volley_register_{}", scen_name), Span::call_site());

        res.extend(quote! {
            #[::volley::runtime::distributed_slice(::volley::runtime::VOLLEY_SCENARIOS)]
            #[linkme(crate = ::volley::runtime::linkme)]
            static #static_name: (
                &'static str,
                fn() -> ::std::pin::Pin<::std::boxed::Box<dyn ::volley::runtime::RunnableScenario>>,
            ) = (stringify!(#scen_name), #register_name);

            fn #register_name() -> ::std::pin::Pin<::std::boxed::Box<dyn ::volley::runtime::RunnableScenario>> {
                ::std::boxed::Box::pin(::volley::scenario::Scenario::new(stringify!(#scen_name), #new_name))
            }
        });
    }

    res
}
