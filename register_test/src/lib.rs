use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into synchronous ones and inject dependencies.
///
/// Injectable dependencies are `BallotRegister<S>`, `Campaign<S>`, `MemoryStore`
/// and `Config`. Registers and campaigns injected into the same test share one
/// store.
///
/// Every test runs against a fresh [`MemoryStore`]. Tests that do not ask for
/// the `MemoryStore` itself also get an ignored `{name}_mongodb` twin, which
/// runs against a throwaway database on the deployment named by
/// `CLEANCITY_TEST_DB_URI` and drops it regardless of how the test terminates.
#[proc_macro_attribute]
pub fn register_test(_args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let (test_args, memory_only) = match check_sig(&item_fn.sig) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the tests can have the original name.
    let name = item_fn.sig.ident.clone();
    let mongo_name = format_ident!("{}_mongodb", name);
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    let init_logging = quote! {
        log4rs_test_utils::test_logging::init_logging_once_for(["cleancity_ballot"], None, None);
    };

    let memory_test = quote! {
        #[test]
        fn #name() {
            #init_logging

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .thread_name("register-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            let store = crate::store::MemoryStore::new();
            runtime.block_on(#new_name(#(#test_args),*));
        }
    };

    let mongo_test = if memory_only {
        quote! {}
    } else {
        quote! {
            #[test]
            #[ignore = "needs a MongoDB replica set, see CLEANCITY_TEST_DB_URI"]
            fn #mongo_name() {
                #init_logging

                // Create an async runtime. We need a separate one for inside and
                // outside the `catch_unwind`.
                let outer_runtime = tokio::runtime::Builder::new_multi_thread()
                    .thread_name("test-setup-cleanup")
                    .worker_threads(1)
                    .enable_all()
                    .build()
                    .unwrap();
                let inner_runtime = tokio::runtime::Builder::new_multi_thread()
                    .thread_name("register-test-thread")
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .unwrap();

                // Run the setup.
                let store = outer_runtime.block_on(crate::store::MongoStore::test_instance());

                // Run the test, catching any panics.
                // Use mutexes to safely transfer `!UnwindSafe` data.
                let store_mutex = std::sync::Mutex::new(store.clone());
                let runtime_mutex = std::sync::Mutex::new(inner_runtime);
                let result = std::panic::catch_unwind(|| {
                    let store = store_mutex.into_inner().unwrap();
                    let runtime = runtime_mutex.into_inner().unwrap();
                    runtime.block_on(#new_name(#(#test_args),*));
                });

                // Run the cleanup.
                outer_runtime.block_on(async {
                    store.database().drop(None).await.unwrap();
                });

                // If the test panicked, re-raise the panic.
                if let Err(cause) = result {
                    std::panic::resume_unwind(cause);
                }
            }
        }
    };

    quote! {
        #item_fn

        #memory_test

        #mongo_test
    }
    .into()
}

/// Ensure the wrapped test is async and map each parameter to the expression
/// that constructs it. Also report whether the test needs the in-memory store.
fn check_sig(sig: &Signature) -> Result<(Vec<TokenStream2>, bool), syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut args = vec![];
    let mut memory_only = false;

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                // Valid as the last path segment for any type is itself
                if let Some(segment) = type_path.path.segments.last() {
                    if segment.ident == "BallotRegister" {
                        args.push(quote! {
                            crate::register::BallotRegister::new(
                                store.clone(),
                                &crate::config::Config::example(),
                            )
                        });
                        continue;
                    } else if segment.ident == "Campaign" {
                        args.push(quote! {
                            crate::campaign::Campaign::new(
                                store.clone(),
                                &crate::config::Config::example(),
                            )
                        });
                        continue;
                    } else if segment.ident == "MemoryStore" {
                        memory_only = true;
                        args.push(quote! { store.clone() });
                        continue;
                    } else if segment.ident == "Config" {
                        args.push(quote! { crate::config::Config::example() });
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `BallotRegister<S>`, `Campaign<S>`, `MemoryStore` or `Config`",
        ));
    }

    Ok((args, memory_only))
}
