//! Derive macro for the `Reflect` trait.

use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::{
    ext::IdentExt, parse_macro_input, parse_quote, spanned::Spanned, Attribute, Data, DeriveInput,
    Fields, GenericParam, Generics, Ident, Index, LitStr, Member, Path,
};

/// Derive `Reflect` and `Field` for a struct.
///
/// Every field is registered under its name (or its index for tuple
/// structs) and must implement `Field`. Supported attributes:
///
/// - `#[reflect(crate = path)]` on the struct: path of the `refgraph` crate.
/// - `#[reflect(name = "...")]` on the struct: the reported type name.
/// - `#[reflect(skip)]` on a field: leave the field out.
/// - `#[reflect(name = "...")]` on a field: register it under another name.
#[proc_macro_derive(Reflect, attributes(reflect))]
pub fn derive_reflect(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let container = match ContainerAttrs::parse(&input.attrs, &input.ident) {
        Ok(container) => container,
        Err(err) => return err.into_compile_error().into(),
    };
    let refgraph = &container.crate_path;

    let name = &input.ident;
    let registrations = match generate_registrations(&input.data) {
        Ok(tokens) => tokens,
        Err(err) => return err.into_compile_error().into(),
    };
    let generics = add_trait_bounds(refgraph, input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let type_name = &container.type_name;

    let generated = quote! {
        impl #impl_generics #refgraph::Reflect for #name #ty_generics #where_clause {
            #[inline]
            fn type_name() -> &'static str {
                #type_name
            }

            #[allow(unused_variables)]
            fn describe(builder: &mut #refgraph::TypeBuilder<Self>) {
                #registrations
            }
        }

        impl #impl_generics #refgraph::Field for #name #ty_generics #where_clause {
            #[inline]
            fn raw_kind() -> #refgraph::RawKind {
                #refgraph::RawKind::structure::<Self>()
            }

            #[inline]
            fn view(&self) -> #refgraph::FieldRef<'_> {
                #refgraph::FieldRef::Struct(self)
            }
        }
    };

    generated.into()
}

struct ContainerAttrs {
    crate_path: Path,
    type_name: LitStr,
}

impl ContainerAttrs {
    fn parse(attrs: &[Attribute], ident: &Ident) -> syn::Result<Self> {
        let mut crate_path: Path = parse_quote!(::refgraph);
        let mut type_name = LitStr::new(&ident.to_string(), ident.span());

        for attr in attrs.iter().filter(|attr| attr.path().is_ident("reflect")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("crate") {
                    crate_path = meta.value()?.parse()?;
                    Ok(())
                } else if meta.path.is_ident("name") {
                    type_name = meta.value()?.parse()?;
                    Ok(())
                } else {
                    Err(meta.error("unsupported attribute"))
                }
            })?;
        }

        Ok(Self {
            crate_path,
            type_name,
        })
    }
}

#[derive(Default)]
struct FieldAttrs {
    skip: bool,
    name: Option<LitStr>,
}

impl FieldAttrs {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut parsed = Self::default();
        for attr in attrs.iter().filter(|attr| attr.path().is_ident("reflect")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    parsed.skip = true;
                    Ok(())
                } else if meta.path.is_ident("name") {
                    parsed.name = Some(meta.value()?.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("unsupported attribute"))
                }
            })?;
        }
        Ok(parsed)
    }
}

fn add_trait_bounds(refgraph: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_field = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Trait(t) = b {
                    t.path.segments.last().is_some_and(|s| s.ident == "Field")
                } else {
                    false
                }
            });
            let has_static = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Lifetime(l) = b {
                    l.ident == "static"
                } else {
                    false
                }
            });

            if !has_field {
                type_param.bounds.push(parse_quote!(#refgraph::Field));
            }
            if !has_static {
                type_param.bounds.push(parse_quote!('static));
            }
        }
    }
    generics
}

fn generate_registrations(data: &Data) -> syn::Result<TokenStream> {
    match data {
        Data::Struct(data) => generate_struct_registrations(&data.fields),
        Data::Enum(e) => Ok(quote_spanned! {
            e.enum_token.span => compile_error!("`Reflect` can only be derived for structs");
        }),
        Data::Union(u) => Ok(quote_spanned! {
            u.union_token.span => compile_error!("`Reflect` can only be derived for structs");
        }),
    }
}

fn generate_struct_registrations(fields: &Fields) -> syn::Result<TokenStream> {
    let mut calls = Vec::new();

    for (i, field) in fields.iter().enumerate() {
        let attrs = FieldAttrs::parse(&field.attrs)?;
        if attrs.skip {
            continue;
        }

        let member = field
            .ident
            .clone()
            .map_or_else(|| Member::Unnamed(Index::from(i)), Member::Named);
        let name = attrs.name.unwrap_or_else(|| {
            let text = match &member {
                Member::Named(ident) => ident.unraw().to_string(),
                Member::Unnamed(index) => index.index.to_string(),
            };
            LitStr::new(&text, field.span())
        });
        let ty = &field.ty;

        calls.push(quote_spanned! {field.span() =>
            builder.field::<#ty, _>(#name, |this: &Self| &this.#member);
        });
    }

    Ok(quote! { #(#calls)* })
}
