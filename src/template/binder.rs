//! Resolve template variables to wire parameters.

use tracing::trace;

use super::parser::TemplateVariable;
use super::{ParamTypes, Params, QueryTemplate};
use crate::error::BindError;
use crate::mapping::{Oid, TypeDescriptor, TypeDispatchTable, WireValue};

/// Declared type and OID for each variable, from the parameter type map.
pub(crate) fn resolve_param_types(
    table: &TypeDispatchTable,
    query: &str,
    variables: &[TemplateVariable],
    types: &ParamTypes,
) -> Result<(Vec<TypeDescriptor>, Vec<Oid>), BindError> {
    let ts = table.type_system();
    let mut resolved = Vec::with_capacity(variables.len());
    let mut oids = Vec::with_capacity(variables.len());

    for var in variables {
        let root = types
            .get(var.key())
            .ok_or_else(|| BindError::UnknownParameterType {
                query: query.to_string(),
                parameter: var.name.clone(),
            })?;
        let ty = ts
            .resolve_nested_type(root, &var.property_path())
            .map_err(|source| BindError::UnresolvedPath {
                query: query.to_string(),
                parameter: var.name.clone(),
                source,
            })?;
        let oid = table.oid_for(ty).map_err(|source| BindError::Mapping {
            query: query.to_string(),
            parameter: var.name.clone(),
            source,
        })?;
        resolved.push(ty.clone());
        oids.push(oid);
    }
    Ok((resolved, oids))
}

/// Serialize one wire parameter per variable occurrence.
///
/// Values are encoded as the template's declared type, so the bytes always
/// match the OIDs the statement was prepared with. An argument the declared
/// codec can't take fails here rather than on the server.
pub fn bind(
    table: &TypeDispatchTable,
    template: &QueryTemplate,
    params: &Params,
) -> Result<Vec<WireValue>, BindError> {
    let ts = table.type_system();
    let query = template.display_name();

    template
        .variables()
        .iter()
        .zip(template.param_types())
        .map(|(var, declared)| {
            let handle = params
                .get(var.key())
                .ok_or_else(|| BindError::MissingParameter {
                    query: query.to_string(),
                    parameter: var.name.clone(),
                })?;

            let (value, ty) = ts
                .resolve_nested_property(&handle.value, &handle.ty, &var.property_path())
                .map_err(|source| BindError::UnresolvedPath {
                    query: query.to_string(),
                    parameter: var.name.clone(),
                    source,
                })?;

            trace!(parameter = %var.name, ty = %ty, declared = %declared, "bind");
            table
                .serialize_value(value, declared)
                .map_err(|source| BindError::Mapping {
                    query: query.to_string(),
                    parameter: var.name.clone(),
                    source,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MappingError;
    use crate::mapping::types::{ObjectDescriptor, PropertyError};
    use crate::mapping::{Value, ValueHandle};
    use std::sync::Arc;

    fn row_type() -> TypeDescriptor {
        let address = ObjectDescriptor::new("Address")
            .field("city", TypeDescriptor::Text)
            .field("zip", TypeDescriptor::Int32);
        TypeDescriptor::Object(Arc::new(
            ObjectDescriptor::new("Row")
                .field("id", TypeDescriptor::Int64)
                .field("address", TypeDescriptor::Object(Arc::new(address))),
        ))
    }

    fn row_value(address: Value) -> Value {
        Value::Object(vec![
            ("id".to_string(), Value::Int64(1)),
            ("address".to_string(), address),
        ])
    }

    fn template(text: &str) -> QueryTemplate {
        let table = TypeDispatchTable::standard();
        let mut types = ParamTypes::new();
        types.insert("row".to_string(), row_type());
        types.insert("limit".to_string(), TypeDescriptor::Int32);
        QueryTemplate::new(&table, Some("updateCity"), text, &types, true, "__test_").unwrap()
    }

    #[test]
    fn test_property_path_binding() {
        let table = TypeDispatchTable::standard();
        let tpl = template("UPDATE t SET city = :row.address.city WHERE id = :row.id");
        assert_eq!(tpl.param_oids(), &[Oid::TEXT, Oid::INT8]);

        let mut params = Params::new();
        params.insert(
            "row".to_string(),
            ValueHandle::new(
                row_value(Value::Object(vec![(
                    "city".to_string(),
                    Value::Text("Lviv".to_string()),
                )])),
                row_type(),
            ),
        );

        let values = bind(&table, &tpl, &params).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].bytes(), b"Lviv");
        assert_eq!(values[1].bytes(), &1i64.to_be_bytes());
    }

    #[test]
    fn test_missing_field_names_parameter() {
        let table = TypeDispatchTable::standard();
        let tpl = template("SELECT :row.address.city");

        let mut params = Params::new();
        let city_less = TypeDescriptor::Object(Arc::new(
            ObjectDescriptor::new("Row").field(
                "address",
                TypeDescriptor::Object(Arc::new(ObjectDescriptor::new("Address"))),
            ),
        ));
        params.insert(
            "row".to_string(),
            ValueHandle::new(row_value(Value::Object(vec![])), city_less),
        );

        let err = bind(&table, &tpl, &params).unwrap_err();
        assert_eq!(
            err,
            BindError::UnresolvedPath {
                query: "updateCity".to_string(),
                parameter: "row.address.city".to_string(),
                source: PropertyError::NoSuchField {
                    type_name: "Address".to_string(),
                    field: "city".to_string(),
                },
            }
        );
        assert!(err.to_string().contains("row.address.city"));
    }

    #[test]
    fn test_missing_parameter() {
        let table = TypeDispatchTable::standard();
        let tpl = template("SELECT * FROM t LIMIT :limit");
        let err = bind(&table, &tpl, &Params::new()).unwrap_err();
        assert_eq!(
            err,
            BindError::MissingParameter {
                query: "updateCity".to_string(),
                parameter: "limit".to_string(),
            }
        );
    }

    #[test]
    fn test_null_intermediate_binds_null() {
        let table = TypeDispatchTable::standard();
        let tpl = template("SELECT :row.address.city");
        let mut params = Params::new();
        params.insert(
            "row".to_string(),
            ValueHandle::new(row_value(Value::Null), row_type()),
        );

        let values = bind(&table, &tpl, &params).unwrap();
        assert!(values[0].is_null());
        assert_eq!(values[0].oid, Oid::TEXT);
    }

    #[test]
    fn test_mapping_failure_is_bind_error() {
        let table = TypeDispatchTable::standard();
        let tpl = template("SELECT * FROM t LIMIT :limit");
        let mut params = Params::new();
        params.insert(
            "limit".to_string(),
            ValueHandle::new(Value::Text("ten".to_string()), TypeDescriptor::Int32),
        );

        let err = bind(&table, &tpl, &params).unwrap_err();
        assert!(matches!(
            err,
            BindError::Mapping {
                source: MappingError::ValueMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_argument_encoded_as_declared_type() {
        let table = TypeDispatchTable::standard();
        let tpl = template("SELECT * FROM t LIMIT :limit");
        let mut params = Params::new();
        params.insert(
            "limit".to_string(),
            ValueHandle::new(Value::Int64(10), TypeDescriptor::Int64),
        );

        let values = bind(&table, &tpl, &params).unwrap();
        assert_eq!(values[0].oid, Oid::INT4);
        assert_eq!(values[0].bytes(), &10i32.to_be_bytes());

        params.insert(
            "limit".to_string(),
            ValueHandle::new(Value::Int64(i64::MAX), TypeDescriptor::Int64),
        );
        let err = bind(&table, &tpl, &params).unwrap_err();
        assert!(matches!(
            err,
            BindError::Mapping {
                source: MappingError::Wire(crate::error::WireFormatError::OutOfRange { .. }),
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_parameter_type() {
        let table = TypeDispatchTable::standard();
        let err = QueryTemplate::new(
            &table,
            None,
            "SELECT :nope",
            &ParamTypes::new(),
            false,
            "__test_",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Bind(BindError::UnknownParameterType { .. })
        ));
    }
}
