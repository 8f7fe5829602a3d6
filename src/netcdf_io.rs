use camino::Utf8Path;
use netcdf::{AttributeValue, Extents};
use netcdf::types::{FloatType, IntType, NcVariableType};
use tracing::debug;

use crate::dataset::{AttrValue, Attribute, DataVar, Dataset, DatasetCodec, Dimension, Values};
use crate::error::ProfileError;

/// Reads and writes datasets as netCDF-4 files through libnetcdf.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfCodec;

impl DatasetCodec for NetcdfCodec {
    fn read(&self, path: &Utf8Path) -> Result<Dataset, ProfileError> {
        let file = netcdf::open(path.as_std_path()).map_err(|err| nc_error(path, "open", err))?;

        let dims = file
            .dimensions()
            .map(|dim| Dimension {
                name: dim.name(),
                len: dim.len(),
            })
            .collect();
        let attrs = file.attributes().filter_map(|attr| read_attribute(&attr)).collect();

        let mut vars = Vec::new();
        for var in file.variables() {
            let name = var.name();
            let Some(values) = read_values(&var).map_err(|err| nc_error(path, &name, err))? else {
                debug!(path = %path, variable = %name, "skipping non-numeric variable");
                continue;
            };
            vars.push(DataVar {
                dims: var.dimensions().iter().map(|dim| dim.name()).collect(),
                attrs: var
                    .attributes()
                    .filter_map(|attr| read_attribute(&attr))
                    .collect(),
                values,
                name,
            });
        }

        Ok(Dataset { dims, vars, attrs })
    }

    fn write(&self, path: &Utf8Path, dataset: &Dataset) -> Result<(), ProfileError> {
        let mut file =
            netcdf::create(path.as_std_path()).map_err(|err| nc_error(path, "create", err))?;

        for dim in &dataset.dims {
            file.add_dimension(&dim.name, dim.len)
                .map_err(|err| nc_error(path, &dim.name, err))?;
        }
        for attr in dataset.attrs.iter().filter(|attr| writable(&attr.name)) {
            file.add_attribute(&attr.name, to_nc_attribute(&attr.value))
                .map_err(|err| nc_error(path, &attr.name, err))?;
        }

        for var in &dataset.vars {
            let dims: Vec<&str> = var.dims.iter().map(String::as_str).collect();
            write_variable(&mut file, var, &dims).map_err(|err| nc_error(path, &var.name, err))?;
        }
        Ok(())
    }
}

fn nc_error(path: &Utf8Path, what: &str, err: netcdf::Error) -> ProfileError {
    ProfileError::Dataset(format!("{path}: {what}: {err}"))
}

/// Names libnetcdf manages itself and rejects on write.
fn writable(name: &str) -> bool {
    !name.starts_with('_') || name == "_FillValue" || name == "_Unsigned"
}

fn read_values(var: &netcdf::Variable<'_>) -> Result<Option<Values>, netcdf::Error> {
    let values = match var.vartype() {
        NcVariableType::Float(FloatType::F64) => Values::F64(var.get::<f64, _>(Extents::All)?),
        NcVariableType::Float(FloatType::F32) => Values::F32(var.get::<f32, _>(Extents::All)?),
        NcVariableType::Int(IntType::I64) => Values::I64(var.get::<i64, _>(Extents::All)?),
        NcVariableType::Int(IntType::I32) => Values::I32(var.get::<i32, _>(Extents::All)?),
        NcVariableType::Int(IntType::I16) => Values::I16(var.get::<i16, _>(Extents::All)?),
        NcVariableType::Int(IntType::I8) => Values::I8(var.get::<i8, _>(Extents::All)?),
        NcVariableType::Int(IntType::U64) => Values::U64(var.get::<u64, _>(Extents::All)?),
        NcVariableType::Int(IntType::U32) => Values::U32(var.get::<u32, _>(Extents::All)?),
        NcVariableType::Int(IntType::U16) => Values::U16(var.get::<u16, _>(Extents::All)?),
        NcVariableType::Int(IntType::U8) => Values::U8(var.get::<u8, _>(Extents::All)?),
        _ => return Ok(None),
    };
    Ok(Some(values))
}

fn write_variable(
    file: &mut netcdf::FileMut,
    var: &DataVar,
    dims: &[&str],
) -> Result<(), netcdf::Error> {
    macro_rules! put {
        ($ty:ty, $data:expr) => {{
            let mut nc_var = file.add_variable::<$ty>(&var.name, dims)?;
            // Attributes (including _FillValue) must precede the data.
            for attr in var.attrs.iter().filter(|attr| writable(&attr.name)) {
                nc_var.put_attribute(&attr.name, to_nc_attribute(&attr.value))?;
            }
            nc_var.put($data.view(), Extents::All)?;
        }};
    }

    match &var.values {
        Values::I8(data) => put!(i8, data),
        Values::U8(data) => put!(u8, data),
        Values::I16(data) => put!(i16, data),
        Values::U16(data) => put!(u16, data),
        Values::I32(data) => put!(i32, data),
        Values::U32(data) => put!(u32, data),
        Values::I64(data) => put!(i64, data),
        Values::U64(data) => put!(u64, data),
        Values::F32(data) => put!(f32, data),
        Values::F64(data) => put!(f64, data),
    }
    Ok(())
}

fn read_attribute(attr: &netcdf::Attribute<'_>) -> Option<Attribute> {
    let value = match attr.value().ok()? {
        AttributeValue::Str(text) => AttrValue::Text(text),
        AttributeValue::Strs(texts) => AttrValue::Text(texts.join("\n")),
        AttributeValue::Schar(v) => AttrValue::Number(vec![v].into()),
        AttributeValue::Schars(v) => AttrValue::Number(v.into()),
        AttributeValue::Uchar(v) => AttrValue::Number(vec![v].into()),
        AttributeValue::Uchars(v) => AttrValue::Number(v.into()),
        AttributeValue::Short(v) => AttrValue::Number(vec![v].into()),
        AttributeValue::Shorts(v) => AttrValue::Number(v.into()),
        AttributeValue::Ushort(v) => AttrValue::Number(vec![v].into()),
        AttributeValue::Ushorts(v) => AttrValue::Number(v.into()),
        AttributeValue::Int(v) => AttrValue::Number(vec![v].into()),
        AttributeValue::Ints(v) => AttrValue::Number(v.into()),
        AttributeValue::Uint(v) => AttrValue::Number(vec![v].into()),
        AttributeValue::Uints(v) => AttrValue::Number(v.into()),
        AttributeValue::Longlong(v) => AttrValue::Number(vec![v].into()),
        AttributeValue::Longlongs(v) => AttrValue::Number(v.into()),
        AttributeValue::Ulonglong(v) => AttrValue::Number(vec![v].into()),
        AttributeValue::Ulonglongs(v) => AttrValue::Number(v.into()),
        AttributeValue::Float(v) => AttrValue::Number(vec![v].into()),
        AttributeValue::Floats(v) => AttrValue::Number(v.into()),
        AttributeValue::Double(v) => AttrValue::Number(vec![v].into()),
        AttributeValue::Doubles(v) => AttrValue::Number(v.into()),
    };
    Some(Attribute {
        name: attr.name().to_string(),
        value,
    })
}

fn to_nc_attribute(value: &AttrValue) -> AttributeValue {
    let values = match value {
        AttrValue::Text(text) => return AttributeValue::Str(text.clone()),
        AttrValue::Number(values) => values,
    };

    macro_rules! attribute {
        ($data:expr, $one:ident, $many:ident) => {{
            let flat: Vec<_> = $data.iter().copied().collect();
            match flat.as_slice() {
                [single] => AttributeValue::$one(*single),
                _ => AttributeValue::$many(flat),
            }
        }};
    }

    match values {
        Values::I8(data) => attribute!(data, Schar, Schars),
        Values::U8(data) => attribute!(data, Uchar, Uchars),
        Values::I16(data) => attribute!(data, Short, Shorts),
        Values::U16(data) => attribute!(data, Ushort, Ushorts),
        Values::I32(data) => attribute!(data, Int, Ints),
        Values::U32(data) => attribute!(data, Uint, Uints),
        Values::I64(data) => attribute!(data, Longlong, Longlongs),
        Values::U64(data) => attribute!(data, Ulonglong, Ulonglongs),
        Values::F32(data) => attribute!(data, Float, Floats),
        Values::F64(data) => attribute!(data, Double, Doubles),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use super::*;

    fn sample() -> Dataset {
        Dataset {
            dims: vec![
                Dimension {
                    name: "time".to_string(),
                    len: 2,
                },
                Dimension {
                    name: "level".to_string(),
                    len: 3,
                },
            ],
            vars: vec![
                DataVar {
                    name: "time".to_string(),
                    dims: vec!["time".to_string()],
                    attrs: vec![Attribute {
                        name: "units".to_string(),
                        value: AttrValue::Text("hours since 1800-01-01 00:00:0.0".to_string()),
                    }],
                    values: vec![1_933_584.0f64, 1_933_587.0].into(),
                },
                DataVar {
                    name: "air".to_string(),
                    dims: vec!["time".to_string(), "level".to_string()],
                    attrs: vec![
                        Attribute {
                            name: "_FillValue".to_string(),
                            value: AttrValue::Number(vec![32766i16].into()),
                        },
                        Attribute {
                            name: "scale_factor".to_string(),
                            value: AttrValue::Number(vec![0.01f32].into()),
                        },
                    ],
                    values: arr2(&[[1i16, 2, 3], [4, 5, 6]]).into_dyn().into(),
                },
            ],
            attrs: vec![Attribute {
                name: "Conventions".to_string(),
                value: AttrValue::Text("CF-1.0".to_string()),
            }],
        }
    }

    #[test]
    fn netcdf_round_trip_keeps_types_and_attributes() {
        let temp = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(temp.path().join("air.nc")).unwrap();
        let dataset = sample();

        NetcdfCodec.write(&path, &dataset).unwrap();
        let back = NetcdfCodec.read(&path).unwrap();

        let air = back.variable("air").unwrap();
        assert_eq!(air.values, Values::from(arr2(&[[1i16, 2, 3], [4, 5, 6]]).into_dyn()));
        assert_eq!(
            air.attr("_FillValue").and_then(AttrValue::as_number),
            Some(&Values::from(vec![32766i16]))
        );
        assert_eq!(back.dimension("level").map(|dim| dim.len), Some(3));
    }

    #[test]
    fn reserved_attribute_names_are_skipped() {
        assert!(writable("units"));
        assert!(writable("_FillValue"));
        assert!(!writable("_ChunkSizes"));
        assert!(!writable("_NCProperties"));
    }
}
